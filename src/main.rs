//! ARRAYMETA - Interactive Shell
//! A small REPL over the array metadata store.

use std::io::{self, BufRead, Write};
use std::str::FromStr;

use arraymeta::config::Config;
use arraymeta::engine::{Array, Context, EncryptionKey, OpenOptions};
use arraymeta::error::{ArrayMetaError, Result};
use arraymeta::types::{Datatype, MetadataValue, QueryMode, Scalar};

fn main() {
    env_logger::init();

    println!();
    println!("  ╔═══════════════════════════════════════════╗");
    println!("  ║            ARRAYMETA Shell                ║");
    println!("  ║    Versioned Array Metadata Store v1.0    ║");
    println!("  ╚═══════════════════════════════════════════╝");
    println!();
    println!("  Commands:");
    println!("    create <array> [key]          - Create an array (32-byte key = encrypted)");
    println!("    open <array> <r|w> [ts] [key] - Open a session");
    println!("    put <key> <type> <values...>  - Buffer a metadata put");
    println!("    get <key>                     - Read a metadata value");
    println!("    at <index>                    - Read by ordinal position");
    println!("    del <key>                     - Buffer a metadata delete");
    println!("    list                          - List all live entries");
    println!("    count                         - Number of live entries");
    println!("    reopen                        - Reopen at the current time");
    println!("    close                         - Close (flush) the session");
    println!("    consolidate <array> [key]     - Consolidate metadata fragments");
    println!("    info                          - Show metrics");
    println!("    exit                          - Quit");
    println!();

    let ctx = match Context::new(Config::default()) {
        Ok(ctx) => ctx,
        Err(err) => {
            eprintln!("[ERROR] Failed to initialise: {}", err);
            std::process::exit(1);
        }
    };

    let mut session: Option<Array> = None;
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("arraymeta> ");
        let _ = stdout.flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break, // EOF
            Ok(_) => {}
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        let cmd = parts[0].to_lowercase();
        if matches!(cmd.as_str(), "exit" | "quit" | "q") {
            println!("  Shutting down ARRAYMETA...");
            break;
        }

        if let Err(e) = run_command(&ctx, &mut session, &cmd, &parts[1..]) {
            println!("  ERROR: {}", e);
        }
    }

    if let Some(mut array) = session.take() {
        if let Err(e) = array.close() {
            eprintln!("[ERROR] Failed to close array: {}", e);
        }
    }
}

fn run_command(
    ctx: &Context,
    session: &mut Option<Array>,
    cmd: &str,
    args: &[&str],
) -> Result<()> {
    match cmd {
        "create" => {
            let name = arg(args, 0, "create <array> [key]")?;
            let key = args.get(1).map(|k| parse_key(k)).transpose()?;
            Array::create(ctx, name, key.as_ref())?;
            println!("  OK");
        }
        "open" => {
            let usage = "open <array> <r|w> [ts] [key]";
            let name = arg(args, 0, usage)?;
            let mode = match arg(args, 1, usage)? {
                "r" | "read" => QueryMode::Read,
                "w" | "write" => QueryMode::Write,
                other => return Err(usage_error(&format!("unknown mode '{}'", other))),
            };
            let mut options = OpenOptions::new(mode);
            let mut rest = &args[2..];
            if let Some(ts) = rest.first().and_then(|t| t.parse::<u64>().ok()) {
                options = options.timestamp(ts);
                rest = &rest[1..];
            }
            if let Some(key) = rest.first() {
                options = options.encryption_key(parse_key(key)?);
            }
            if let Some(mut previous) = session.take() {
                previous.close()?;
            }
            *session = Some(Array::open(ctx, name, options)?);
            println!("  OK ({})", mode);
        }
        "put" | "set" => {
            let usage = "put <key> <type> <values...>";
            let key = arg(args, 0, usage)?;
            let datatype = Datatype::from_str(arg(args, 1, usage)?)?;
            let value = parse_value(datatype, &args[2..])?;
            open_session(session)?.put_value(key.as_bytes(), value)?;
            println!("  OK");
        }
        "get" => {
            let key = arg(args, 0, "get <key>")?;
            match open_session(session)?.get_metadata(key.as_bytes())? {
                Some(value) => println!("  {}", format_value(&value)),
                None => println!("  (nil)"),
            }
        }
        "at" => {
            let index = arg(args, 0, "at <index>")?
                .parse::<u64>()
                .map_err(|_| usage_error("index must be a non-negative integer"))?;
            let (key, value) = open_session(session)?.get_metadata_from_index(index)?;
            println!(
                "  {} -> {}",
                String::from_utf8_lossy(&key),
                format_value(&value)
            );
        }
        "del" | "delete" => {
            let key = arg(args, 0, "del <key>")?;
            open_session(session)?.delete_metadata(key.as_bytes())?;
            println!("  OK (deleted)");
        }
        "list" | "scan" => {
            let entries = open_session(session)?.metadata_entries()?;
            if entries.is_empty() {
                println!("  (empty)");
            } else {
                for (key, value) in &entries {
                    println!(
                        "  {} -> {}",
                        String::from_utf8_lossy(key),
                        format_value(value)
                    );
                }
                println!("  ({} entries)", entries.len());
            }
        }
        "count" => {
            println!("  {}", open_session(session)?.metadata_num()?);
        }
        "reopen" => {
            open_session(session)?.reopen()?;
            println!("  OK");
        }
        "close" => {
            if let Some(mut array) = session.take() {
                array.close()?;
            }
            println!("  OK (closed)");
        }
        "consolidate" => {
            let name = arg(args, 0, "consolidate <array> [key]")?;
            let key = args.get(1).map(|k| parse_key(k)).transpose()?;
            let report = Array::consolidate_metadata(ctx, name, key.as_ref())?;
            println!(
                "  OK ({} fragments -> {} live entries, {} dropped)",
                report.inputs, report.live_entries, report.dropped_entries
            );
        }
        "info" | "stats" => {
            println!("{}", ctx.metrics().report());
        }
        _ => {
            println!("  Unknown command: '{}'. Type 'exit' to quit.", cmd);
        }
    }
    Ok(())
}

fn arg<'a>(args: &[&'a str], i: usize, usage: &str) -> Result<&'a str> {
    args.get(i)
        .copied()
        .ok_or_else(|| usage_error(&format!("usage: {}", usage)))
}

fn usage_error(msg: &str) -> ArrayMetaError {
    ArrayMetaError::InvalidArgument(msg.to_string())
}

fn open_session(session: &mut Option<Array>) -> Result<&mut Array> {
    session
        .as_mut()
        .ok_or_else(|| ArrayMetaError::InvalidState("no open array; use 'open'".into()))
}

fn parse_key(raw: &str) -> Result<EncryptionKey> {
    EncryptionKey::aes256_gcm(raw.as_bytes())
}

fn parse_value(datatype: Datatype, tokens: &[&str]) -> Result<MetadataValue> {
    match datatype {
        Datatype::Int8 => parse_scalars::<i8>(tokens),
        Datatype::UInt8 => parse_scalars::<u8>(tokens),
        Datatype::Int16 => parse_scalars::<i16>(tokens),
        Datatype::UInt16 => parse_scalars::<u16>(tokens),
        Datatype::Int32 => parse_scalars::<i32>(tokens),
        Datatype::UInt32 => parse_scalars::<u32>(tokens),
        Datatype::Int64 => parse_scalars::<i64>(tokens),
        Datatype::UInt64 => parse_scalars::<u64>(tokens),
        Datatype::Float32 => parse_scalars::<f32>(tokens),
        Datatype::Float64 => parse_scalars::<f64>(tokens),
        Datatype::Char | Datatype::StringAscii | Datatype::StringUtf8 => {
            let text = tokens.join(" ");
            MetadataValue::new(datatype, text.len() as u32, text.into_bytes())
        }
        Datatype::Any => Err(usage_error("value type ANY is not allowed")),
    }
}

fn parse_scalars<T>(tokens: &[&str]) -> Result<MetadataValue>
where
    T: Scalar + FromStr,
{
    let values = tokens
        .iter()
        .map(|t| {
            t.parse::<T>()
                .map_err(|_| usage_error(&format!("cannot parse '{}' as {}", t, T::DATATYPE)))
        })
        .collect::<Result<Vec<T>>>()?;
    MetadataValue::from_slice(&values)
}

fn format_value(value: &MetadataValue) -> String {
    fn join<T: Scalar + ToString>(value: &MetadataValue) -> String {
        value
            .to_vec::<T>()
            .unwrap_or_default()
            .iter()
            .map(T::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }

    let body = match value.datatype() {
        Datatype::Int8 => join::<i8>(value),
        Datatype::UInt8 => join::<u8>(value),
        Datatype::Int16 => join::<i16>(value),
        Datatype::UInt16 => join::<u16>(value),
        Datatype::Int32 => join::<i32>(value),
        Datatype::UInt32 => join::<u32>(value),
        Datatype::Int64 => join::<i64>(value),
        Datatype::UInt64 => join::<u64>(value),
        Datatype::Float32 => join::<f32>(value),
        Datatype::Float64 => join::<f64>(value),
        _ => match value.as_str() {
            Some(s) => format!("\"{}\"", s),
            None => "<binary data>".to_string(),
        },
    };
    format!("{} [{}]", value.datatype(), body)
}
