// cli/symbols.rs - `heron symbols` subcommand
//
// Indexes a workspace and prints the declarations matching a name prefix.

use std::path::PathBuf;
use std::sync::Arc;

use crate::declaration::Declaration;
use crate::index::SymbolQuery;
use crate::session::NullPublisher;

#[derive(Debug)]
pub struct SymbolsArgs {
    pub path: PathBuf,
    pub query: SymbolQuery,
    pub settings: Option<PathBuf>,
}

/// Expected usage:
/// `heron symbols <path> <prefix> [--receiver <type>] [--limit <n>] [--substring] [--settings <file.json>]`
pub fn parse_args(args: &mut impl Iterator<Item = String>) -> Result<SymbolsArgs, String> {
    let mut positional: Vec<String> = Vec::new();
    let mut receiver: Option<String> = None;
    let mut limit: Option<usize> = None;
    let mut substring = false;
    let mut settings: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--receiver" => {
                receiver = Some(args.next().ok_or("--receiver requires a type name")?);
            }
            "--limit" => {
                let value = args.next().ok_or("--limit requires a number")?;
                limit = Some(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid limit: '{}'", value))?,
                );
            }
            "--substring" => substring = true,
            "--settings" => {
                settings = Some(PathBuf::from(args.next().ok_or("--settings requires a file")?));
            }
            other if other.starts_with('-') => return Err(format!("Unknown flag: '{}'", other)),
            _ => positional.push(arg),
        }
    }

    let [path, prefix] = <[String; 2]>::try_from(positional)
        .map_err(|_| "Expected exactly <path> and <prefix>".to_string())?;

    let mut query = SymbolQuery::prefix(prefix);
    if let Some(receiver) = receiver {
        query = query.with_receiver(receiver);
    }
    if let Some(limit) = limit {
        query = query.with_limit(limit);
    }
    if substring {
        query = query.substring();
    }

    Ok(SymbolsArgs {
        path: PathBuf::from(path),
        query,
        settings,
    })
}

pub async fn run_symbols(args: &SymbolsArgs) -> anyhow::Result<Vec<Declaration>> {
    let config = super::load_config(args.settings.as_deref())?;
    let (session, _root) = super::open_session(&args.path, config, Arc::new(NullPublisher)).await?;
    Ok(session.query(&args.query)?)
}

pub fn print_declarations(declarations: &[Declaration]) {
    for d in declarations {
        let location = d
            .location
            .as_ref()
            .map(|l| {
                format!(
                    "{}:{}:{}",
                    l.uri.path(),
                    l.range.start.line + 1,
                    l.range.start.character + 1
                )
            })
            .unwrap_or_else(|| "<external>".to_string());
        let name = match &d.extension_receiver_type {
            Some(receiver) => format!("{}.{}", receiver, d.short_name),
            None => d.fq_name.clone(),
        };
        println!("{:<10} {:<40} {}", format!("{:?}", d.kind), name, location);
    }
}
