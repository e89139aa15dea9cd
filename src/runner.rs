use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use camino::Utf8PathBuf;
use tracing::debug;

use crate::cli::{Cli, Command, ConfigCommand, RunArgs, TargetArgs};
use crate::config::{self, Overrides, Settings, UnnestConfig};
use crate::flatten;
use crate::report;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ConfigPathSource {
    Explicit,
    Discovered,
    HomeDefault,
}

impl ConfigPathSource {
    fn as_str(&self) -> &'static str {
        match self {
            ConfigPathSource::Explicit => "explicit",
            ConfigPathSource::Discovered => "discovered",
            ConfigPathSource::HomeDefault => "home-default",
        }
    }
}

#[derive(Clone, Debug)]
struct ResolvedConfigPath {
    path: Utf8PathBuf,
    source: ConfigPathSource,
}

pub fn run(cli: Cli) -> Result<()> {
    let ctx = CliContext::from(&cli);
    ctx.apply_chdir()?;

    match cli.command {
        None => handle_run(&ctx, RunArgs::default()),
        Some(Command::Run(args)) => handle_run(&ctx, args),
        Some(Command::Plan(args)) => handle_plan(&ctx, args),
        Some(Command::Config { command }) => handle_config(&ctx, command),
    }
}

fn handle_run(ctx: &CliContext, args: RunArgs) -> Result<()> {
    let settings = ctx.settings(&args.target, args.keep_going)?;
    debug!("resolved settings: {:?}", settings);

    let report = flatten::flatten(&settings.root, &settings.options)
        .with_context(|| format!("flattening {}", settings.root))?;

    if ctx.json {
        println!("{}", report::format_json(&report)?);
    } else {
        print!("{}", report::format_text(&report));
    }

    let failed = report.failed();
    if failed > 0 {
        bail!(
            "{} of {} candidate(s) under {} failed",
            failed,
            report.outcomes.len(),
            settings.root
        );
    }
    Ok(())
}

fn handle_plan(ctx: &CliContext, args: TargetArgs) -> Result<()> {
    let settings = ctx.settings(&args, false)?;
    let plans = flatten::plan(&settings.root, &settings.options)
        .with_context(|| format!("planning {}", settings.root))?;

    if ctx.json {
        let view: Vec<serde_json::Value> = plans
            .iter()
            .map(|plan| match plan {
                Ok(plan) => serde_json::json!({ "status": "ok", "plan": plan }),
                Err(err) => serde_json::json!({
                    "status": "failed",
                    "error": { "kind": err.kind(), "message": report::error_chain(err) },
                }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else if plans.is_empty() {
        println!("Nothing to flatten under {}.", settings.root);
    } else {
        println!("Plan for {} (suffix `{}`):", settings.root, settings.options.suffix);
        for plan in &plans {
            match plan {
                Ok(plan) => {
                    println!("  {} -> {}", plan.candidate, plan.target);
                    println!("    from {}", plan.nested);
                    for entry in &plan.entries {
                        println!("      {}", entry);
                    }
                }
                Err(err) => println!("  cannot flatten: {}", report::error_chain(err)),
            }
        }
    }

    let blocked = plans.iter().filter(|plan| plan.is_err()).count();
    if blocked > 0 {
        bail!(
            "{} of {} candidate(s) under {} cannot be flattened",
            blocked,
            plans.len(),
            settings.root
        );
    }
    Ok(())
}

fn handle_config(ctx: &CliContext, command: Option<ConfigCommand>) -> Result<()> {
    let resolved = ctx.resolve_config_path()?;
    let config_path = resolved.path;
    match command {
        Some(ConfigCommand::Path) => {
            println!("Config path: {} ({})", config_path, resolved.source.as_str());
            Ok(())
        }
        None | Some(ConfigCommand::Show) => {
            if config_path.exists() {
                println!("Config path: {} ({})", config_path, resolved.source.as_str());
            } else {
                println!("No config found at {}; using defaults.", config_path);
                println!("Use `unnest config generate` to scaffold a configuration.");
            }
            let settings = ctx.settings(&TargetArgs::default(), false)?;
            println!("{}", config::format_summary(&settings));
            Ok(())
        }
        Some(ConfigCommand::Generate { path, force }) => {
            let target = match path {
                Some(path) => utf8(path, "config generate path")?,
                None => config_path.clone(),
            };
            config::write_example_config(&target, force)?;
            if force {
                println!("Overwrote config at {}", target);
            } else {
                println!("Wrote example config to {}", target);
            }
            Ok(())
        }
        Some(ConfigCommand::Set { key, value }) => {
            config::set_value(&config_path, &key, &value)?;
            println!("Set `{}` = `{}` in {} ({})", key, value, config_path, resolved.source.as_str());
            Ok(())
        }
    }
}

fn utf8(path: PathBuf, what: &str) -> Result<Utf8PathBuf> {
    Utf8PathBuf::from_path_buf(path).map_err(|_| anyhow!("{} must be valid UTF-8", what))
}

#[derive(Clone, Debug)]
struct CliContext {
    chdir: Option<PathBuf>,
    file: Option<PathBuf>,
    dry_run: bool,
    json: bool,
}

impl CliContext {
    fn apply_chdir(&self) -> Result<()> {
        if let Some(path) = &self.chdir {
            std::env::set_current_dir(path)
                .with_context(|| format!("changing directory to {}", path.display()))?;
        }
        Ok(())
    }

    fn resolve_config_path(&self) -> Result<ResolvedConfigPath> {
        if let Some(path) = &self.file {
            return Ok(ResolvedConfigPath {
                path: utf8(path.clone(), "config path")?,
                source: ConfigPathSource::Explicit,
            });
        }

        if let Ok(cwd) = std::env::current_dir() {
            if let Ok(mut dir) = Utf8PathBuf::from_path_buf(cwd) {
                loop {
                    let candidate = dir.join(".unnest").join("config.toml");
                    if candidate.exists() {
                        return Ok(ResolvedConfigPath {
                            path: candidate,
                            source: ConfigPathSource::Discovered,
                        });
                    }

                    let Some(parent) = dir.parent() else {
                        break;
                    };
                    dir = parent.to_path_buf();
                }
            }
        }

        let home = dirs::home_dir().ok_or_else(|| anyhow!("unable to determine home directory"))?;
        let mut path = home;
        path.push(".unnest");
        path.push("config.toml");
        Ok(ResolvedConfigPath {
            path: utf8(path, "config path")?,
            source: ConfigPathSource::HomeDefault,
        })
    }

    fn load_config(&self) -> Result<UnnestConfig> {
        let resolved = self.resolve_config_path()?;
        debug!(
            "loading config from {} ({})",
            resolved.path,
            resolved.source.as_str()
        );
        if resolved.source == ConfigPathSource::Explicit {
            return config::load_from_path(&resolved.path);
        }
        config::load_or_default(&resolved.path)
    }

    fn settings(&self, target: &TargetArgs, keep_going: bool) -> Result<Settings> {
        let root = target
            .root
            .clone()
            .map(|path| utf8(path, "root"))
            .transpose()?;
        self.load_config()?.resolve(Overrides {
            root,
            suffix: target.suffix.clone(),
            nested: target.nested,
            keep_going,
            dry_run: self.dry_run,
        })
    }
}

impl From<&Cli> for CliContext {
    fn from(cli: &Cli) -> Self {
        Self {
            chdir: cli.chdir.clone(),
            file: cli.file.clone(),
            dry_run: cli.dry_run,
            json: cli.json,
        }
    }
}
