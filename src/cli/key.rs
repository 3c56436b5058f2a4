//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块实现了 `key` 子命令，按策略解析一次请求的缓存键。

use crate::cli::KeyArgs;
use crate::config::Config;
use crate::http::{AttributeMap, FragmentRequest};
use crate::key::KeyResolver;
use anyhow::{anyhow, Context, Result};

pub async fn execute(args: &KeyArgs) -> Result<()> {
    let config = Config::from_file(&args.config)
        .with_context(|| format!("Invalid policy file '{}'", args.config.display()))?;
    let policy = config
        .policies
        .iter()
        .find(|p| p.template == args.template || p.name == args.template)
        .with_context(|| format!("No policy for template '{}'", args.template))?;

    let mut request = FragmentRequest::new(&args.method, &policy.template);
    for pair in &args.params {
        let (name, value) = split_pair(pair)?;
        request = request.param(name, value);
    }
    for pair in &args.headers {
        let (name, value) = split_pair(pair)?;
        request = request.header(name, value);
    }
    for pair in &args.cookies {
        let (name, value) = split_pair(pair)?;
        request = request.cookie(name, value);
    }

    let resolver = KeyResolver::new(config.global.default_timeout);
    let descriptor = resolver.resolve(&request, &AttributeMap::new(), policy);

    match &descriptor.key {
        Some(key) => println!("Key:           {}", key),
        None => println!("Key:           (not cached)"),
    }
    if !descriptor.data_ids.is_empty() {
        println!("Data ids:      {}", descriptor.data_ids.join(", "));
    }
    if !descriptor.invalidations.is_empty() {
        println!("Invalidations: {}", descriptor.invalidations.join(", "));
    }
    println!("Timeout:       {}s", descriptor.metadata.timeout);
    Ok(())
}

fn split_pair(pair: &str) -> Result<(&str, &str)> {
    pair.split_once('=')
        .ok_or_else(|| anyhow!("Expected NAME=VALUE, got '{}'", pair))
}
