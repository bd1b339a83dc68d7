//! `ferry providers`: what this build can talk to, and what would be used.

use clap::Args;
use ferry_core::EnvSnapshot;
use ferry_runtime::{
    resolve_fallback_config, resolve_provider_config, BackendKind, ProviderConfig,
    ProviderRegistry,
};
use std::fmt::Write as _;

use super::{Outcome, ProviderArgs};

#[derive(Args, Debug)]
pub struct ProvidersArgs {
    #[command(flatten)]
    pub provider: ProviderArgs,
}

pub fn execute(args: ProvidersArgs) -> anyhow::Result<Outcome> {
    let env = EnvSnapshot::capture();
    print!("{}", render(&env, &args.provider)?);
    Ok(Outcome::Success)
}

fn describe(registry: &ProviderRegistry, label: &str, config: &ProviderConfig) -> String {
    let provider = registry.build(config);
    format!(
        "{label}: {} ({})\n",
        provider.descriptor(),
        if provider.is_available() { "available" } else { "unavailable" }
    )
}

fn render(env: &EnvSnapshot, args: &ProviderArgs) -> anyhow::Result<String> {
    let registry = ProviderRegistry::with_defaults();
    let mut out = String::from("Backends:\n");
    for kind in BackendKind::ALL {
        match registry.get_factory(kind) {
            Some(factory) => {
                let _ = writeln!(out, "  {:<14} {}", kind.as_str(), factory.description());
            }
            None => {
                let feature = kind.feature().unwrap_or("-");
                let _ = writeln!(out, "  {:<14} not compiled in (feature '{feature}')", kind.as_str());
            }
        }
    }

    let overrides = args.overrides();
    let primary = resolve_provider_config(env, &overrides)?;
    out.push('\n');
    out.push_str(&describe(&registry, "Primary", &primary));
    match resolve_fallback_config(env, &overrides)? {
        Some(fallback) => out.push_str(&describe(&registry, "Fallback", &fallback)),
        None => out.push_str("Fallback: none\n"),
    }
    Ok(out)
}
