use crate::output::{self, Style};
use smartquery_core::{column_statistics, QueryEngine};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = ":history  :schema  :stats  :help  :quit";

enum Command {
    History,
    Schema,
    Stats,
    Help,
    Quit,
    Query(String),
}

fn parse_line(line: &str) -> Command {
    match line.trim() {
        ":history" | ":h" => Command::History,
        ":schema" => Command::Schema,
        ":stats" => Command::Stats,
        ":help" | ":?" => Command::Help,
        ":quit" | ":q" | ":exit" => Command::Quit,
        other => Command::Query(other.to_string()),
    }
}

fn prompt() -> std::io::Result<()> {
    print!("smartquery> ");
    std::io::stdout().flush()
}

pub async fn run(engine: &QueryEngine, style: &Style) -> anyhow::Result<()> {
    let mode = if engine.remote_available() { "remote + local" } else { "local only" };
    println!("{} rows loaded ({mode}). {HELP}", engine.dataset().len());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;
    while let Some(line) = lines.next_line().await? {
        match parse_line(&line) {
            Command::Quit => break,
            Command::Help => println!("{HELP}\nAnything else is a query; an empty line shows every row."),
            Command::History => output::print_history(&engine.history(), style)?,
            Command::Schema => output::print_schema(engine.dataset().columns(), engine.dataset().len(), style)?,
            Command::Stats => output::print_stats(&column_statistics(engine.dataset()), style)?,
            Command::Query(text) => crate::run_query(engine, &text, style).await?,
        }
        prompt()?;
    }
    engine.close();
    Ok(())
}
