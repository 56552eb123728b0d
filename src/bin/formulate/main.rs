use anyhow::Result;
use colored::*;
use std::process::ExitCode;
use std::sync::Arc;

use formulate::app_config::AppConfig;
use formulate::health::{HealthStatus, probe};
use formulate::pipeline::{
    Orchestrator, PipelineConfig, PipelineLogger, PipelineResult, StageRuntime, StageSettings,
    StageStatus,
};
use formulate::providers::{ProviderOverrides, create_selector_with_overrides};
use formulate::sanitize::sanitize_for_log;
use formulate::{ModelId, RetryController};

mod args;
use args::{CliArgs, USAGE};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match CliArgs::parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), e.to_string().red());
            eprintln!("{}", USAGE.dimmed());
            return ExitCode::from(2);
        }
    };

    if args.help {
        println!("{USAGE}");
        return ExitCode::SUCCESS;
    }

    init_logging(args.verbose);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), e.to_string().red());
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

async fn run(args: CliArgs) -> Result<ExitCode> {
    let app_config = AppConfig::load()?;
    let overrides = ProviderOverrides {
        model: args.model.clone().map(ModelId::new),
        ..Default::default()
    };
    let (selector, resolved) = create_selector_with_overrides(overrides)?;

    if args.health {
        let settings = app_config.health_settings(&resolved.backend_url);
        let status = probe(&reqwest::Client::new(), &settings).await;
        let label = match status {
            HealthStatus::Connected => status.as_str().green(),
            _ => status.as_str().red(),
        };
        println!("{} {}", settings.url().dimmed(), label);
        return Ok(if status == HealthStatus::Connected {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    let context = match args.context_map() {
        Ok(context) => context,
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), e.to_string().red());
            return Ok(ExitCode::from(2));
        }
    };

    let config = PipelineConfig::new(args.request.clone().unwrap_or_default())
        .with_batch(
            args.batch_size
                .unwrap_or(app_config.pipeline.default_batch_size),
            args.unit
                .clone()
                .unwrap_or_else(|| app_config.pipeline.default_unit.clone()),
        )
        .with_nutrients(args.nutrients)
        .with_costs(!args.no_costs)
        .with_context(context);

    let retry = RetryController::new(Arc::new(selector))
        .with_max_attempts(args.attempts.unwrap_or(app_config.retry.max_attempts));
    let settings = StageSettings {
        model: resolved.model.clone(),
        temperature: resolved.temperature,
        max_tokens: resolved.max_tokens,
        deadline: app_config.pipeline.stage_deadline(),
    };

    let mut orchestrator = Orchestrator::standard(StageRuntime::new(retry, settings));
    if let Some(dir) = &app_config.pipeline.log_dir {
        match PipelineLogger::new(dir) {
            Ok(logger) => orchestrator = orchestrator.with_logger(logger),
            Err(e) => log::warn!("run journal disabled ({}): {e}", dir.display()),
        }
    }

    if !args.json_output {
        println!(
            "{} {} | {} | {}",
            ">>".bold(),
            "formulate".bold(),
            resolved.model.as_str().cyan(),
            resolved.backend_url.dimmed()
        );
    }

    let result = orchestrator.run(config).await;

    if args.json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result);
    }

    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_summary(result: &PipelineResult) {
    for entry in &result.agent_history {
        match entry.status {
            StageStatus::Success => println!(
                "{} {} {}",
                "●".green(),
                entry.agent.bold(),
                format!("{}ms", entry.duration).dimmed()
            ),
            StageStatus::Failed => println!(
                "{} {} {}",
                "✗".red().bold(),
                entry.agent.bold(),
                sanitize_for_log(entry.error.as_deref().unwrap_or("failed")).red()
            ),
        }
        if let Some(metadata) = result.stage_metadata.get(&entry.agent) {
            for warning in &metadata.warnings {
                println!("  {} {}", "!".yellow(), warning.yellow());
            }
        }
    }

    if let Some(recipe) = &result.recipe {
        println!("\n{} ({} ingredients)", recipe.name.bold(), recipe.ingredients.len());
        for ingredient in &recipe.ingredients {
            println!("  {:>6.2}%  {}", ingredient.percentage, ingredient.name);
        }
    }

    if let Some(calculation) = &result.calculation {
        println!(
            "\n{} {} {}",
            "Batch".bold(),
            calculation.target_batch_size,
            calculation.target_unit
        );
        for line in &calculation.scaled_ingredients {
            println!("  {:>10.3} {:<4} {}", line.quantity, line.unit, line.name);
        }
        if let Some(total) = calculation.total_cost {
            println!("  {} {total:.2}", "total cost".dimmed());
        }
    }

    let verdict = if result.validation.valid {
        "valid".green().bold()
    } else {
        "invalid".red().bold()
    };
    println!("\n{} {}", "Validation:".bold(), verdict);
    for error in &result.validation.errors {
        println!("  {} {}", "-".red(), error);
    }
    for warning in &result.validation.warnings {
        println!("  {} {}", "-".yellow(), warning);
    }

    println!(
        "\n{}",
        format!(
            "run {} · {} stage(s) · {}ms",
            result.id,
            result.agent_history.len(),
            result.total_duration
        )
        .dimmed()
    );
}
