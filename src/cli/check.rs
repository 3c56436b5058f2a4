//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块实现了 `check` 子命令。

use crate::cli::CheckArgs;
use crate::config::{Config, FragmentPolicy};
use anyhow::{Context, Result};

pub async fn execute(args: &CheckArgs) -> Result<()> {
    let config = Config::from_file(&args.config)
        .with_context(|| format!("Invalid policy file '{}'", args.config.display()))?;

    println!("=== Fragment Policies ({}) ===\n", config.policies.len());
    for policy in &config.policies {
        print_policy(policy, args.verbose);
    }
    if !config.external.groups.is_empty() {
        println!("External groups:");
        for group in &config.external.groups {
            match &group.listen {
                Some(addr) => println!("  {} (listening on {})", group.name, addr),
                None => println!("  {}", group.name),
            }
        }
    }
    println!("✅ {} is valid", args.config.display());
    Ok(())
}

fn print_policy(policy: &FragmentPolicy, verbose: bool) {
    let mut flags = Vec::new();
    if policy.edge_cacheable {
        flags.push(format!("edge={}", policy.edge_url()));
    }
    if policy.consume_subfragments {
        flags.push("consume".to_string());
    }
    if policy.do_not_consume {
        flags.push("do-not-consume".to_string());
    }
    if let Some(group) = &policy.external_cache {
        flags.push(format!("external={}", group));
    }
    let timeout = match policy.timeout {
        Some(t) if t > 0 => format!("{}s", t),
        Some(_) => "never".to_string(),
        None => "default".to_string(),
    };
    println!(
        "Policy:   {} -> {} (timeout {}) {}",
        policy.name,
        policy.template,
        timeout,
        flags.join(" ")
    );

    if verbose {
        for component in &policy.components {
            let mut extra = Vec::new();
            if component.required {
                extra.push("required".to_string());
            }
            if let Some(id) = &component.data_id {
                extra.push(format!("data_id={}", id));
            }
            if let Some(id) = &component.invalidate {
                extra.push(format!("invalidate={}", id));
            }
            if !component.in_key {
                extra.push("not in key".to_string());
            }
            println!("    {:?} {} {}", component.kind, component.id, extra.join(" "));
        }
    }
    println!();
}
