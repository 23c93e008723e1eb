mod bytecode;
mod classfile;
mod descriptor;
mod engine;
mod ir;
mod item;
mod opcodes;
mod opstack;
mod rules;
mod scan;
#[cfg(test)]
mod testing;

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use serde_json::json;
use serde_sarif::sarif::{
    Artifact, Invocation, MultiformatMessageString, ReportingDescriptor, Result as SarifResult,
    Run, SCHEMA_URL, Sarif, Tool, ToolComponent,
};

use crate::engine::{AnalysisContext, run_rules};
use crate::opstack::StackConfig;
use crate::rules::{RuleMetadata, default_rules};
use crate::scan::scan_inputs;

/// CLI arguments for opscope execution.
#[derive(Parser, Debug)]
#[command(
    name = "opscope",
    about = "Symbolic operand stack analysis of JVM class files and JAR files, reported as SARIF.",
    version
)]
struct Cli {
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    #[arg(long, value_name = "PATH")]
    classpath: Vec<PathBuf>,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Upper bound on interpretation passes for methods with loops; 1 disables learning.
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u16).range(1..))]
    passes: u16,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }
    for entry in &cli.classpath {
        if !entry.exists() {
            anyhow::bail!("classpath entry not found: {}", entry.display());
        }
    }

    let started_at = Instant::now();
    let scan = scan_inputs(&cli.input, &cli.classpath)?;
    let class_count = scan.class_count();
    let artifact_count = scan.artifacts.len();
    let scan_ms = started_at.elapsed().as_millis();

    let config = StackConfig {
        max_passes: cli.passes as usize,
    };
    let context = AnalysisContext::new(scan.classes, config);
    let rules = default_rules();
    let analysis_started_at = Instant::now();
    let results = run_rules(&context, &rules)?;
    let analysis_ms = analysis_started_at.elapsed().as_millis();
    info!("{} result(s) from {} class(es)", results.len(), class_count);

    let metadata: Vec<RuleMetadata> = rules.iter().map(|rule| rule.metadata()).collect();
    let invocation = build_invocation();
    let sarif = build_sarif(scan.artifacts, invocation, &metadata, results);

    let mut writer = output_writer(cli.output.as_deref())?;
    serde_json::to_writer_pretty(&mut writer, &sarif)
        .context("failed to serialize SARIF output")?;
    writer
        .write_all(b"\n")
        .context("failed to write SARIF output")?;

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} scan_ms={} analysis_ms={} classes={} artifacts={}",
            started_at.elapsed().as_millis(),
            scan_ms,
            analysis_ms,
            class_count,
            artifact_count
        );
    }

    Ok(())
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}

fn build_invocation() -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");

    Invocation::builder()
        .execution_successful(true)
        .arguments(arguments)
        .command_line(command_line)
        .build()
}

fn rule_descriptor(metadata: &RuleMetadata) -> ReportingDescriptor {
    ReportingDescriptor::builder()
        .id(metadata.id)
        .name(metadata.name)
        .short_description(
            MultiformatMessageString::builder()
                .text(metadata.description)
                .build(),
        )
        .build()
}

fn build_sarif(
    artifacts: Vec<Artifact>,
    invocation: Invocation,
    rules: &[RuleMetadata],
    results: Vec<SarifResult>,
) -> Sarif {
    let driver = ToolComponent::builder()
        .name("opscope")
        .rules(rules.iter().map(rule_descriptor).collect::<Vec<_>>())
        .build();
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let run = if artifacts.is_empty() {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .build()
    } else {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .artifacts(artifacts)
            .build()
    };

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}
