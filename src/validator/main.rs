//! Standalone validator for campaign plan files.
//!
//! This tool validates JSON campaign plans before they are imported,
//! checking step numbering, message lengths, intervals and step limits.

use std::process::ExitCode;

use clap::Parser;

// Import from the main crate
use followup_user_bot::config::{CampaignPlan, MAX_MESSAGE_LENGTH, PlanStep};
use followup_user_bot::telegram::truncate_for_log;

/// Campaign plan validator.
#[derive(Parser, Debug)]
#[command(name = "validate_campaign")]
#[command(about = "Validates campaign plan files for the follow-up userbot")]
#[command(version)]
struct Args {
    /// Path to the JSON plan file to validate.
    #[arg(short, long, default_value = "campaign.json")]
    file: String,

    /// Generate an example plan file at the specified path.
    #[arg(long)]
    generate_example: Option<String>,

    /// Show detailed information for each step.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Handle example generation
    if let Some(output_path) = args.generate_example {
        return generate_example(&output_path);
    }

    // Validate the plan file
    validate_plan(&args.file, args.verbose)
}

fn generate_example(output_path: &str) -> ExitCode {
    let example = CampaignPlan::example();

    match example.save_to_file(output_path) {
        Ok(()) => {
            println!("✓ Example campaign plan written to: {output_path}");
            println!("\nThe plan contains {} example steps.", example.steps.len());
            println!("Steps without 'interval_seconds' wait the campaign default.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Failed to write example file: {e}");
            ExitCode::FAILURE
        }
    }
}

fn validate_plan(path: &str, verbose: bool) -> ExitCode {
    println!("Validating: {path}\n");

    // Load the plan
    let plan = match CampaignPlan::load_from_file(path) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("✗ Failed to load campaign plan: {e}");
            return ExitCode::FAILURE;
        }
    };

    if verbose {
        println!(
            "Campaign '{}': every {}s, {} steps, {}",
            plan.name,
            plan.interval_seconds,
            plan.effective_max_steps(),
            if plan.active { "active" } else { "paused" }
        );
    }

    // Validate everything
    let results = plan.validate_all();
    let errors: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();

    let mut steps: Vec<&PlanStep> = plan.steps.iter().collect();
    steps.sort_by_key(|s| s.step_number);

    let mut warnings = 0;
    for step in steps {
        let char_count = step.char_count();

        if verbose {
            let wait = step
                .interval_seconds
                .map_or_else(|| "default".to_owned(), |s| format!("{s}s"));
            println!(
                "[{}] \"{}\" ({} chars, wait {})",
                step.step_number,
                truncate_for_log(&step.message, 40),
                char_count,
                wait
            );
        }

        if step.step_number > plan.effective_max_steps() {
            warnings += 1;
            println!(
                "  ⚠ Warning: step {} is beyond max_steps and will never be sent",
                step.step_number
            );
        }

        // Check for warnings (close to limit)
        let warn_threshold = MAX_MESSAGE_LENGTH * 90 / 100;
        if char_count > warn_threshold && char_count <= MAX_MESSAGE_LENGTH {
            warnings += 1;
            if verbose {
                println!(
                    "  ⚠ Warning: {char_count} chars is close to the {MAX_MESSAGE_LENGTH} char limit"
                );
            }
        }
    }

    for error in &errors {
        println!("  ✗ Error: {error}");
    }

    println!();

    // Summary
    if errors.is_empty() {
        println!("✓ Plan '{}' is valid ({} steps)", plan.name, plan.steps.len());

        if warnings > 0 {
            println!("  ({warnings} warning(s))");
        }

        ExitCode::SUCCESS
    } else {
        println!("✗ Validation failed: {} error(s)", errors.len());
        ExitCode::FAILURE
    }
}
