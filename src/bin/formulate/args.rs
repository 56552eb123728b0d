use anyhow::{Result, anyhow};
use serde_json::{Map, Value};
use std::env;

pub const USAGE: &str = "\
Usage: formulate -r <request> [options]
       formulate --health

Options:
  -r, --request <text>     What to formulate (required unless --health)
  -b, --batch-size <n>     Target batch size
  -u, --unit <unit>        Target batch unit
      --nutrients          Ask for nutritional balance
      --no-costs           Skip cost estimates
  -c, --context <json>     JSON object of reference hints
  -m, --model <id>         Model identifier
      --attempts <n>       Attempts per structured request (1-5)
      --json               Print the full result as JSON
      --health             Probe the backend and exit
  -v                       More logging (-vv for debug)
  -h, --help               Show this help";

#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub request: Option<String>,    // -r/--request
    pub batch_size: Option<f64>,    // -b/--batch-size
    pub unit: Option<String>,       // -u/--unit
    pub nutrients: bool,            // --nutrients
    pub no_costs: bool,             // --no-costs
    pub context: Option<String>,    // -c/--context
    pub model: Option<String>,      // -m/--model
    pub attempts: Option<u32>,      // --attempts
    pub json_output: bool,          // --json
    pub health: bool,               // --health
    pub verbose: u8,                // -v, -vv
    pub help: bool,                 // -h/--help
}

impl CliArgs {
    /// Parse command-line arguments
    pub fn parse() -> Result<Self> {
        let args: Vec<String> = env::args().collect();
        Self::parse_from(&args[1..])
    }

    /// Parse from a slice of arguments (for testing)
    pub fn parse_from(args: &[String]) -> Result<Self> {
        let mut result = CliArgs::default();

        let mut i = 0;
        while i < args.len() {
            let arg = &args[i];

            match arg.as_str() {
                "-r" | "--request" => {
                    result.request = Some(value_for(args, &mut i)?.to_string());
                }
                "-b" | "--batch-size" => {
                    let raw = value_for(args, &mut i)?;
                    let size: f64 = raw
                        .parse()
                        .map_err(|_| anyhow!("{arg} expects a number, got '{raw}'"))?;
                    if !size.is_finite() || size <= 0.0 {
                        return Err(anyhow!("{arg} must be positive"));
                    }
                    result.batch_size = Some(size);
                }
                "-u" | "--unit" => {
                    result.unit = Some(value_for(args, &mut i)?.to_string());
                }
                "--nutrients" => {
                    result.nutrients = true;
                }
                "--no-costs" => {
                    result.no_costs = true;
                }
                "-c" | "--context" => {
                    result.context = Some(value_for(args, &mut i)?.to_string());
                }
                "-m" | "--model" => {
                    result.model = Some(value_for(args, &mut i)?.to_string());
                }
                "--attempts" => {
                    let raw = value_for(args, &mut i)?;
                    let attempts: u32 = raw
                        .parse()
                        .map_err(|_| anyhow!("{arg} expects a whole number, got '{raw}'"))?;
                    result.attempts = Some(attempts);
                }
                "--json" => {
                    result.json_output = true;
                }
                "--health" => {
                    result.health = true;
                }
                "-v" => {
                    result.verbose = result.verbose.saturating_add(1);
                }
                "-vv" => {
                    result.verbose = result.verbose.saturating_add(2);
                }
                "-h" | "--help" => {
                    result.help = true;
                }
                unknown => {
                    return Err(anyhow!("Unknown argument: {unknown}"));
                }
            }

            i += 1;
        }

        if !result.help && !result.health && result.request.is_none() {
            return Err(anyhow!("-r/--request is required"));
        }

        Ok(result)
    }

    /// The `--context` value as a JSON object.
    pub fn context_map(&self) -> Result<Map<String, Value>> {
        let Some(raw) = &self.context else {
            return Ok(Map::new());
        };
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(anyhow!("--context must be a JSON object")),
            Err(e) => Err(anyhow!("--context is not valid JSON: {e}")),
        }
    }
}

fn value_for<'a>(args: &'a [String], i: &mut usize) -> Result<&'a str> {
    let flag = &args[*i];
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("{flag} requires a value"))
}
