//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了CLI命令行接口。

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "oxfrag")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(name = "check", about = "Validate a policy file and list its policies")]
    Check(CheckArgs),

    #[command(name = "key", about = "Resolve the cache key of a request against a policy")]
    Key(KeyArgs),
}

#[derive(Parser, Debug)]
pub struct CheckArgs {
    #[arg(short, long, help = "Path to the policy file")]
    pub config: PathBuf,

    #[arg(short, long, help = "Show key components of each policy")]
    pub verbose: bool,
}

#[derive(Parser, Debug)]
pub struct KeyArgs {
    #[arg(short, long, help = "Path to the policy file")]
    pub config: PathBuf,

    #[arg(short, long, help = "Template (route path) of the fragment")]
    pub template: String,

    #[arg(short, long, default_value = "GET", help = "Request method")]
    pub method: String,

    #[arg(long = "param", value_name = "NAME=VALUE", help = "Request parameter")]
    pub params: Vec<String>,

    #[arg(long = "header", value_name = "NAME=VALUE", help = "Request header")]
    pub headers: Vec<String>,

    #[arg(long = "cookie", value_name = "NAME=VALUE", help = "Request cookie")]
    pub cookies: Vec<String>,
}

mod check;
mod key;

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    crate::telemetry::init_tracing("warn");

    match &cli.command {
        Commands::Check(args) => check::execute(args).await,
        Commands::Key(args) => key::execute(args).await,
    }
}
