#![warn(clippy::all, rust_2018_idioms)]

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;

use cfn_hotswap::app::cfn_template::RenderedTemplate;
use cfn_hotswap::app::hotswap::aws::{
    load_deployment_environment, load_sdk_config, AwsHotswapEnvironment, AwsTemplateSource,
};
use cfn_hotswap::app::hotswap::{
    HotswapConfig, HotswapDeployer, HotswapResult, OperationStatus, TargetStack,
};
use cfn_hotswap::{trace_debug, trace_error, trace_info, trace_warn};

const DEFAULT_FILTER: &str = "cfn_hotswap=info,aws_config=warn,aws_smithy_runtime=warn";

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));

    let log_file = directories::ProjectDirs::from("com", "", "cfn-hotswap").and_then(|dirs| {
        let log_dir = dirs.data_dir().join("logs");
        std::fs::create_dir_all(&log_dir).ok()?;
        std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(log_dir.join("cfn-hotswap.log"))
            .ok()
    });

    let file_layer = log_file.map(|file| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
    });

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer);

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return;
    }
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to initialize log-to-tracing bridge: {}", e);
    }
}

/// Apply the code and definition changes of a CloudFormation template directly to the
/// deployed resources, or report why a full deployment is needed.
///
/// Exit status: 0 when the changes were hotswapped, 2 when a full deployment is required,
/// 1 on errors.
#[derive(Debug, Parser)]
#[command(name = "cfn-hotswap", version = env!("BUILD_VERSION"))]
struct Cli {
    /// Name of the deployed root stack
    stack_name: String,

    /// Synthesized template of the root stack (JSON or YAML)
    template: PathBuf,

    /// Template of a nested stack, addressed by its logical ID path from the root
    #[arg(long = "nested", value_name = "LOGICAL_ID[.LOGICAL_ID...]=FILE", value_parser = parse_nested)]
    nested: Vec<NestedTemplate>,

    /// Parameter override for the root stack
    #[arg(long = "parameter", value_name = "NAME=VALUE", value_parser = parse_key_value)]
    parameters: Vec<(String, String)>,

    /// Hotswap settings file (TOML)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override max_concurrency of the settings file
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    max_concurrency: Option<u16>,
}

impl Cli {
    fn parameter_overrides(&self) -> BTreeMap<String, String> {
        self.parameters.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct NestedTemplate {
    path: Vec<String>,
    file: PathBuf,
}

fn parse_nested(value: &str) -> Result<NestedTemplate, String> {
    let (path, file) = value
        .split_once('=')
        .ok_or_else(|| "expected <LogicalId>[.<LogicalId>...]=<template>".to_string())?;
    let path: Vec<String> = path.split('.').map(str::to_string).collect();
    if path.iter().any(String::is_empty) || file.is_empty() {
        return Err(format!("invalid nested stack template {}", value));
    }
    Ok(NestedTemplate {
        path,
        file: PathBuf::from(file),
    })
}

fn parse_key_value(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((name, parameter)) if !name.is_empty() => {
            Ok((name.to_string(), parameter.to_string()))
        }
        _ => Err("expected <Name>=<Value>".to_string()),
    }
}

/// Assemble the target tree; parents are inserted before their nested stacks
fn load_target(cli: &Cli) -> Result<TargetStack> {
    let mut root = TargetStack::new(RenderedTemplate::from_file(&cli.template)?);

    let mut nested: Vec<_> = cli.nested.iter().collect();
    nested.sort_by_key(|nested| nested.path.len());
    for NestedTemplate { path, file } in nested {
        let template = RenderedTemplate::from_file(file)?;
        let (leaf, parents) = path
            .split_last()
            .ok_or_else(|| anyhow!("empty nested stack path"))?;
        let mut parent = &mut root;
        for id in parents {
            parent = parent.nested.get_mut(id).ok_or_else(|| {
                anyhow!("nested stack {} must be given before {}", id, path.join("."))
            })?;
        }
        parent.nested.insert(leaf.clone(), TargetStack::new(template));
    }

    let assembly_dir = cli.template.parent().unwrap_or_else(|| Path::new("."));
    discover_nested_templates(&mut root, assembly_dir)?;
    Ok(root)
}

/// Load nested templates not given on the command line from the asset path recorded in
/// each nested stack resource's metadata, relative to the root template's directory
fn discover_nested_templates(stack: &mut TargetStack, assembly_dir: &Path) -> Result<()> {
    let missing: Vec<(String, PathBuf)> = stack
        .template
        .resources
        .iter()
        .filter(|(id, resource)| resource.is_nested_stack() && !stack.nested.contains_key(*id))
        .filter_map(|(id, resource)| Some((id.clone(), assembly_dir.join(resource.asset_path()?))))
        .collect();

    for (logical_id, path) in missing {
        trace_debug!("Loading nested template {} from {}", logical_id, path.display());
        let template = RenderedTemplate::from_file(&path)
            .with_context(|| format!("Failed to load nested template {}", logical_id))?;
        stack.nested.insert(logical_id, TargetStack::new(template));
    }

    for child in stack.nested.values_mut() {
        discover_nested_templates(child, assembly_dir)?;
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => HotswapConfig::load_from_file(path)?,
        None => HotswapConfig::default(),
    };
    if let Some(max_concurrency) = cli.max_concurrency {
        config.max_concurrency = usize::from(max_concurrency);
    }
    let target = load_target(&cli)?;

    let sdk_config = load_sdk_config().await;
    let deployment = load_deployment_environment(&sdk_config, &config.environment).await?;
    let deployer = HotswapDeployer::new(
        Arc::new(AwsTemplateSource::new(&sdk_config)),
        Arc::new(AwsHotswapEnvironment::new(&sdk_config)),
        deployment,
    )
    .with_config(config);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trace_warn!("Interrupted, letting in-flight operations finish");
            on_interrupt.cancel();
        }
    });

    let result = deployer
        .try_hotswap_with_cancellation(
            &cli.stack_name,
            &target,
            &cli.parameter_overrides(),
            &cancel,
        )
        .await;

    Ok(match result {
        HotswapResult::Applied(outcomes) => {
            if outcomes.is_empty() {
                println!("No changes to hotswap");
            }
            for outcome in &outcomes {
                let status = match &outcome.status {
                    OperationStatus::Succeeded => "ok".to_string(),
                    OperationStatus::Skipped => "skipped".to_string(),
                    OperationStatus::Failed(reason) => format!("FAILED: {}", reason),
                };
                println!(
                    "{}/{}: {} [{}]",
                    outcome.stack_name, outcome.logical_id, outcome.description, status
                );
            }
            ExitCode::SUCCESS
        }
        HotswapResult::FullDeploymentRequired(blockers) => {
            println!("Full deployment required:");
            for blocker in &blockers {
                println!("  {}", blocker);
            }
            ExitCode::from(2)
        }
        HotswapResult::Error(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    // Exit status 2 means "full deployment required", so usage errors exit with 1
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_logging();
    trace_info!(
        "cfn-hotswap {} hotswapping {}",
        env!("BUILD_VERSION"),
        cli.stack_name
    );

    match run(cli)
        .await
        .with_context(|| "Hotswap could not be attempted")
    {
        Ok(code) => code,
        Err(e) => {
            trace_error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
