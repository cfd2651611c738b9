use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use tracing_subscriber::filter::LevelFilter;

use rlite::btree::{BTree, Cell};
use rlite::cursor::{Cursor, CursorMode};
use rlite::error::RliteError;
use rlite::format::PageType;
use rlite::record;
use rlite::types::Value;

fn main() -> ExitCode {
    let mut command = None;
    let mut verbosity = 0u8;
    let mut path = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" => match args.next() {
                Some(cmd) => command = Some(cmd),
                None => {
                    eprintln!("ERROR: -c requires a command");
                    return ExitCode::FAILURE;
                }
            },
            "-v" => verbosity += 1,
            "-h" => {
                println!("Usage: rlite [-c COMMAND] [DATABASE]");
                return ExitCode::SUCCESS;
            }
            other if other.starts_with('-') => {
                eprintln!("ERROR: Unknown option {other}");
                return ExitCode::FAILURE;
            }
            other => path = Some(other.to_string()),
        }
    }

    let level = match verbosity {
        0 => LevelFilter::ERROR,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();

    let mut db = match &path {
        Some(p) => match BTree::open(p) {
            Ok(db) => db,
            Err(e) => {
                eprintln!("ERROR: could not open file {p}: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => {
            eprintln!("Connected to a transient in-memory database.");
            match BTree::in_memory() {
                Ok(db) => db,
                Err(e) => {
                    eprintln!("ERROR: {e}");
                    return ExitCode::FAILURE;
                }
            }
        }
    };

    if let Some(cmd) = command {
        handle_command(&mut db, &cmd);
        return ExitCode::SUCCESS;
    }

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut reader = stdin.lock();

    loop {
        {
            let mut out = stdout.lock();
            let _ = out.write_all(b"rlite> ");
            let _ = out.flush();
        }

        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => {
                println!();
                break;
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("ERROR: reading input: {e}");
                break;
            }
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == ".quit" || trimmed == ".exit" {
            break;
        }
        handle_command(&mut db, trimmed);
    }

    ExitCode::SUCCESS
}

/// Dispatch one shell command. The SQL compiler lives outside this
/// program, so commands speak to the engine directly.
fn handle_command(db: &mut BTree, input: &str) {
    let parts: Vec<&str> = input.split_whitespace().collect();
    match parts.as_slice() {
        [".help"] => {
            println!(".help                       Show this help");
            println!(".quit                       Exit this program");
            println!("create-table                Allocate a table B-tree, print its root page");
            println!("create-index                Allocate an index B-tree, print its root page");
            println!("insert ROOT KEY VAL...      Insert a row into the table at ROOT");
            println!("find ROOT KEY               Print the row stored under KEY");
            println!("scan ROOT                   Print every row in the table at ROOT");
        }
        ["create-table"] => match db.new_node(PageType::TableLeaf) {
            Ok(page) => println!("table root: {page}"),
            Err(e) => eprintln!("ERROR: {e}"),
        },
        ["create-index"] => match db.new_node(PageType::IndexLeaf) {
            Ok(page) => println!("index root: {page}"),
            Err(e) => eprintln!("ERROR: {e}"),
        },
        ["insert", root, key, rest @ ..] => {
            let (Ok(root), Ok(key)) = (root.parse::<u32>(), key.parse::<u32>()) else {
                eprintln!("ERROR: ROOT and KEY must be integers");
                return;
            };
            let values: Vec<Value> = rest.iter().map(|s| parse_value(s)).collect();
            let payload = record::serialize(&values);
            match db.insert_in_table(root, key, &payload) {
                Ok(()) => {}
                Err(RliteError::Duplicate(k)) => eprintln!("ERROR: key {k} already exists"),
                Err(e) => eprintln!("ERROR: {e}"),
            }
        }
        ["find", root, key] => {
            let (Ok(root), Ok(key)) = (root.parse::<u32>(), key.parse::<u32>()) else {
                eprintln!("ERROR: ROOT and KEY must be integers");
                return;
            };
            match db.find(root, key) {
                Ok(payload) => match record::deserialize(&payload) {
                    Ok(values) => println!("{}", format_row(key, &values)),
                    Err(e) => eprintln!("ERROR: {e}"),
                },
                Err(RliteError::NotFound) => eprintln!("no entry for key {key}"),
                Err(e) => eprintln!("ERROR: {e}"),
            }
        }
        ["scan", root] => {
            let Ok(root) = root.parse::<u32>() else {
                eprintln!("ERROR: ROOT must be an integer");
                return;
            };
            if let Err(e) = scan_table(db, root) {
                eprintln!("ERROR: {e}");
            }
        }
        _ => {
            eprintln!("ERROR: unknown command: \"{input}\". Enter \".help\" for help");
        }
    }
}

fn parse_value(token: &str) -> Value {
    match token.parse::<i32>() {
        Ok(i) => Value::Integer(i),
        Err(_) => Value::Text(token.to_string()),
    }
}

fn format_row(key: u32, values: &[Value]) -> String {
    let mut parts = vec![key.to_string()];
    for value in values {
        parts.push(match value {
            Value::Null => "NULL".to_string(),
            other => other.to_string(),
        });
    }
    parts.join("|")
}

fn scan_table(db: &mut BTree, root: u32) -> rlite::Result<()> {
    let mut cursor = Cursor::open(db, CursorMode::Read, root)?;
    if cursor.root_is_empty() {
        return Ok(());
    }
    cursor.rewind(db)?;
    loop {
        if let Cell::TableLeaf { key, data } = cursor.current_cell()? {
            let values = record::deserialize(&data)?;
            println!("{}", format_row(key, &values));
        }
        match cursor.next(db) {
            Ok(()) => {}
            Err(RliteError::NoNext) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
