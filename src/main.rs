use std::path::PathBuf;

use clap::Parser;
use script_bridge::{init_logging, BridgeConfig, BridgeError, BridgeResult, Environment, ResultView};

#[derive(Parser, Debug)]
#[command(name = "script-bridge", version, about = "Evaluate scripts in a bridged JavaScript environment")]
struct Cli {
    /// Configuration file, TOML or JSON by extension
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Root directory holding the modules directory
    #[arg(long, value_name = "DIR")]
    module_root: Option<PathBuf>,

    /// Scripts to evaluate, in order
    #[arg(required = true, value_name = "SCRIPT")]
    scripts: Vec<PathBuf>,
}

fn load_config(path: Option<&PathBuf>) -> BridgeResult<BridgeConfig> {
    let Some(path) = path else {
        return Ok(BridgeConfig::load_or_default());
    };
    let config = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => BridgeConfig::from_json_file(path)?,
        _ => BridgeConfig::from_toml_file(path)?,
    };
    Ok(config)
}

fn render(view: ResultView<'_>) -> String {
    match view {
        ResultView::None => "undefined".to_string(),
        ResultView::Bool(b) => b.to_string(),
        ResultView::Double(d) => d.to_string(),
        ResultView::String(s) | ResultView::Array(s) | ResultView::Object(s) => s.to_string(),
        ResultView::Buffer(bytes) => format!("[buffer {} bytes]", bytes.len()),
        ResultView::Function(handle) => format!("[function {handle}]"),
    }
}

fn run(cli: Cli) -> BridgeResult<()> {
    let mut config = load_config(cli.config.as_ref())?;
    config.apply_env_overrides();
    if let Some(root) = cli.module_root {
        config.module_root = Some(root);
    }
    init_logging(&config.logging);

    let env = Environment::new(config)?;
    for script in &cli.scripts {
        let line = env.eval_file_with(script, render)?;
        println!("==> {line}");
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("script-bridge failed: {}", e);
        let code = match e {
            BridgeError::Config(_) => 2,
            _ => 1,
        };
        std::process::exit(code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let cli = Cli::try_parse_from(["script-bridge", "--module-root", "/srv", "a.js", "b.js"]).unwrap();
        assert_eq!(cli.module_root, Some(PathBuf::from("/srv")));
        assert_eq!(cli.scripts, vec![PathBuf::from("a.js"), PathBuf::from("b.js")]);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(Cli::try_parse_from(["script-bridge"]).is_err());
        assert!(Cli::try_parse_from(["script-bridge", "a.js", "--config"]).is_err());
        assert!(Cli::try_parse_from(["script-bridge", "--verbose", "a.js"]).is_err());
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_render() {
        assert_eq!(render(ResultView::Double(7.0)), "7");
        assert_eq!(render(ResultView::Object(r#"{"a":1}"#)), r#"{"a":1}"#);
        assert_eq!(render(ResultView::Buffer(&[1, 2])), "[buffer 2 bytes]");
    }
}
