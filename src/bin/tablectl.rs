//! CLI tool for consolidating table candidate feeds

use std::env;
use std::process;
use table_consolidator::{
    consolidate_feeds, document_to_markdown, ConsolidationError, ExtractionConfig, PatternMemory,
};

struct Args {
    feeds: Vec<String>,
    markdown: bool,
    config: Option<String>,
    memory: Option<String>,
}

fn usage(program: &str) -> ! {
    eprintln!("Usage: {} <feed.json>... [--markdown] [--config <file>] [--memory <file>]", program);
    eprintln!();
    eprintln!("Consolidates analyzer table candidates into canonical tables.");
    eprintln!("Prints a JSON batch report unless --markdown is given.");
    eprintln!("--memory loads the pattern memory from <file> (if present) and saves it back.");
    process::exit(1);
}

fn parse_args() -> Args {
    let raw: Vec<String> = env::args().collect();
    let program = raw.first().cloned().unwrap_or_else(|| "tablectl".into());
    let mut args = Args {
        feeds: Vec::new(),
        markdown: false,
        config: None,
        memory: None,
    };

    let mut iter = raw.into_iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--markdown" => args.markdown = true,
            "--json" => args.markdown = false,
            "--config" => args.config = Some(iter.next().unwrap_or_else(|| usage(&program))),
            "--memory" => args.memory = Some(iter.next().unwrap_or_else(|| usage(&program))),
            "-h" | "--help" => usage(&program),
            flag if flag.starts_with("--") => {
                eprintln!("Unknown option: {}", flag);
                usage(&program);
            }
            _ => args.feeds.push(arg),
        }
    }

    if args.feeds.is_empty() {
        usage(&program);
    }
    args
}

fn run(args: &Args) -> Result<bool, ConsolidationError> {
    let config = match &args.config {
        Some(path) => ExtractionConfig::from_file(path)?,
        None => ExtractionConfig::default(),
    };

    let memory = match &args.memory {
        Some(path) if std::path::Path::new(path).exists() => Some(PatternMemory::load(path)?),
        _ => None,
    };

    let (report, extractor) = consolidate_feeds(&args.feeds, config, memory)?;

    if args.markdown {
        for (idx, document) in report.documents.iter().enumerate() {
            if idx > 0 {
                println!();
            }
            print!("{}", document_to_markdown(document));
        }
    } else {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    let stats = extractor.stats();
    eprintln!(
        "{} documents, {} tables, {} failed, {} patterns known",
        stats.documents_processed, stats.total_tables, stats.documents_failed, stats.patterns_learned
    );

    if let (Some(path), Some(memory)) = (&args.memory, extractor.memory()) {
        memory.save(path)?;
    }

    Ok(stats.documents_failed == 0)
}

fn main() {
    let args = parse_args();
    match run(&args) {
        Ok(true) => {}
        Ok(false) => process::exit(2),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
