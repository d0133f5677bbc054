use std::io::Read;

use ctxbridge_protocol::{validate_message, Message, Value};
use serde::Serialize;
use tracing::debug;

use crate::cmd::CheckArgs;
use crate::exit::{io_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_json, table, yes_no, OutputFormat};

#[derive(Serialize)]
struct CheckOutput {
    source: String,
    valid: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    message_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn run(args: CheckArgs, format: OutputFormat) -> CliResult<i32> {
    let (source, text) = read_input(&args)?;
    let json: serde_json::Value = serde_json::from_str(&text)
        .map_err(|err| CliError::new(DATA_INVALID, format!("{source}: invalid JSON: {err}")))?;

    let out = evaluate(source, &Value::from(json), args.namespace.as_deref());
    debug!(valid = out.valid, error = ?out.error, "checked envelope");
    print_check(&out, format);

    Ok(if out.valid { SUCCESS } else { DATA_INVALID })
}

fn read_input(args: &CheckArgs) -> CliResult<(String, String)> {
    match &args.file {
        Some(path) if path.as_os_str() != "-" => {
            let text = std::fs::read_to_string(path)
                .map_err(|err| io_error(&format!("read {}", path.display()), err))?;
            Ok((path.display().to_string(), text))
        }
        _ => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .map_err(|err| io_error("read stdin", err))?;
            Ok(("stdin".to_string(), text))
        }
    }
}

fn evaluate(source: String, candidate: &Value, namespace: Option<&str>) -> CheckOutput {
    match validate_message(Some(candidate)) {
        Ok(message) => {
            let error = namespace
                .filter(|expected| *expected != message.namespace)
                .map(|expected| {
                    format!(
                        "namespace mismatch: expected '{expected}', found '{}'",
                        message.namespace
                    )
                });
            described(source, &message, error)
        }
        Err(err) => CheckOutput {
            source,
            valid: false,
            message_type: None,
            id: None,
            path: None,
            namespace: None,
            error: Some(err.to_string()),
        },
    }
}

fn described(source: String, message: &Message, error: Option<String>) -> CheckOutput {
    CheckOutput {
        source,
        valid: error.is_none(),
        message_type: Some(message.message_type.as_str()),
        id: Some(message.id.clone()),
        path: Some(message.path_display()),
        namespace: Some(message.namespace.clone()),
        error,
    }
}

fn print_check(out: &CheckOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut table = table(vec!["SOURCE", "VALID", "TYPE", "ID", "PATH", "ERROR"]);
            table.add_row(vec![
                out.source.clone(),
                yes_no(out.valid).to_string(),
                out.message_type.unwrap_or("-").to_string(),
                out.id.clone().unwrap_or_else(|| "-".to_string()),
                out.path.clone().unwrap_or_else(|| "-".to_string()),
                out.error.clone().unwrap_or_else(|| "-".to_string()),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("Envelope Check:");
            println!("  Source:    {}", out.source);
            println!("  Valid:     {}", yes_no(out.valid));
            if let Some(kind) = out.message_type {
                println!("  Type:      {kind}");
            }
            if let Some(id) = &out.id {
                println!("  Id:        {id}");
            }
            if let Some(path) = &out.path {
                println!("  Path:      {path}");
            }
            if let Some(error) = &out.error {
                println!("  Error:     {error}");
            }
        }
        OutputFormat::Raw => {
            println!("{}", if out.valid { "valid" } else { "invalid" });
        }
    }
}
