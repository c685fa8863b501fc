//! Check command - report which assets apply to an entity without installing.

use anyhow::Result;
use asset_agent::{is_applicable, ExpressionEvaluator};
use clap::Args;
use console::style;
use std::path::PathBuf;

use crate::config::{read_entity, read_specs};

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// JSON file with an array of asset definitions
    #[arg(long, value_name = "FILE")]
    pub assets: PathBuf,

    /// JSON file describing the entity the assets are filtered against
    #[arg(long, value_name = "FILE")]
    pub entity: Option<PathBuf>,
}

pub fn execute(args: CheckArgs) -> Result<i32> {
    let specs = read_specs(&args.assets)?;
    let entity = read_entity(args.entity.as_deref())?;
    let evaluator = ExpressionEvaluator::new();

    let mut failures = 0;
    for spec in &specs {
        if let Err(e) = spec.validate() {
            println!("{} {}", style("invalid").red().bold(), e);
            failures += 1;
            continue;
        }

        match is_applicable(&evaluator, spec, &entity) {
            Ok(true) => println!("{} {}", style("applies").green(), spec.name),
            Ok(false) => println!("{} {}", style("skipped").dim(), spec.name),
            Err(e) => {
                println!("{} {}: {}", style("error").red().bold(), spec.name, e);
                failures += 1;
            }
        }
    }

    Ok(if failures > 0 { 1 } else { 0 })
}
