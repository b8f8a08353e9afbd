use anyhow::Context;
use clap::Parser;
use common::App;
use itertools::Itertools;
use std::{
    fs::{read_to_string, File},
    io::{BufWriter, Write},
    path::PathBuf,
};

/// Runs an application over its inputs in a single process. The output is
/// the reference the distributed runtime is checked against.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(short, long)]
    app_name: String,
    /// Defaults to `mr-<app>-seq`.
    #[arg(short, long)]
    output: Option<PathBuf>,
    input_files: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let app = App::load(&cli.app_name)?;

    let mut intermediate = Vec::new();
    for file in &cli.input_files {
        let content = read_to_string(file).with_context(|| format!("reading {file}"))?;
        intermediate.extend(app.map(file, &content));
    }

    intermediate.sort();

    let output = cli
        .output
        .unwrap_or_else(|| PathBuf::from(format!("mr-{}-seq", &cli.app_name)));
    let mut output_file = BufWriter::new(
        File::create(&output).with_context(|| format!("creating {}", output.display()))?,
    );
    for (k, kvs) in intermediate
        .into_iter()
        .group_by(|kv| kv.key.clone())
        .into_iter()
    {
        let output = app.reduce(&k, kvs.map(|kv| kv.value).collect_vec());
        writeln!(output_file, "{} {}", k, output)?;
    }
    output_file.flush()?;

    Ok(())
}
