use std::env;
use std::fs;
use std::io::{self, Read};
use std::process;

fn main() {
    if let Err(err) = run() {
        eprintln!("{}: {err}", env!("CARGO_PKG_NAME"));
        process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let mut args = env::args();
    let program = args
        .next()
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());

    let selector = match args.next() {
        Some(flag) if is_help_flag(&flag) => {
            print_help(&program);
            return Ok(());
        }
        Some(flag) if is_version_flag(&flag) => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(selector) => selector,
        None => return Err(format!("missing selector\n{}", usage(&program))),
    };

    let input = match args.next() {
        Some(path) if path == "-" => Input::Stdin,
        Some(path) => Input::File(path),
        None => Input::Stdin,
    };

    if let Some(extra) = args.next() {
        return Err(format!("unexpected argument: {extra}\n{}", usage(&program)));
    }

    let html = match input {
        Input::Stdin => read_stdin()?,
        Input::File(path) => read_file(&path)?,
    };

    let matches = page_dom::select_outer_html(&html, &selector).map_err(|err| err.to_string())?;
    for fragment in matches {
        println!("{fragment}");
    }
    Ok(())
}

enum Input {
    Stdin,
    File(String),
}

fn is_help_flag(arg: &str) -> bool {
    arg == "-h" || arg == "--help"
}

fn is_version_flag(arg: &str) -> bool {
    arg == "-V" || arg == "--version"
}

fn read_file(path: &str) -> Result<String, String> {
    fs::read_to_string(path).map_err(|err| format!("failed to read '{path}': {err}"))
}

fn read_stdin() -> Result<String, String> {
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .map_err(|err| format!("failed to read stdin: {err}"))?;
    Ok(buf)
}

fn print_help(program: &str) {
    println!(
        "{}\n\nPrints the outer HTML of every element matching SELECTOR, one per line.\n\nOptions:\n  -h, --help      Show this message\n  -V, --version   Print package version",
        usage(program)
    );
}

fn usage(program: &str) -> String {
    format!("Usage: {program} <SELECTOR> [FILE|-]")
}
