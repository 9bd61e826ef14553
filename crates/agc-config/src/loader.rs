use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::env::EnvResolver;
use crate::schema::Config;

/// Ordered list of config file locations searched from lowest to highest
/// priority. Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    paths.push(PathBuf::from("/etc/agentcore/config.yaml"));
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/agentcore/config.yaml"));
    }
    paths.push(PathBuf::from(".agentcore.yaml"));
    paths
}

/// Load configuration by merging all discovered YAML files, then apply
/// `${VAR}` expansion against `env` before deserializing into [`Config`].
/// Expansion happens on the raw text so any string value anywhere in the
/// document (not just a predeclared set of fields) may reference a
/// variable.
pub fn load(extra: Option<&Path>, env: &EnvResolver) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text = std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    expand_strings(&mut merged, env)?;

    let config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty()) {
        Config::default()
    } else {
        serde_yaml::from_value(merged)?
    };
    Ok(config)
}

/// Deep-merge `src` into `dst`; `src` wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d.entry(k).or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

fn expand_strings(value: &mut serde_yaml::Value, env: &EnvResolver) -> anyhow::Result<()> {
    match value {
        serde_yaml::Value::String(s) => {
            *s = env.expand(s)?;
        }
        serde_yaml::Value::Mapping(m) => {
            for (_, v) in m.iter_mut() {
                expand_strings(v, env)?;
            }
        }
        serde_yaml::Value::Sequence(seq) => {
            for v in seq.iter_mut() {
                expand_strings(v, env)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn val(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn merge_scalar_src_wins() {
        let mut dst = val("x: 1");
        let src = val("x: 2");
        merge_yaml(&mut dst, src);
        assert_eq!(dst["x"].as_i64(), Some(2));
    }

    #[test]
    fn merge_preserves_keys_not_in_src() {
        let mut dst = val("a: 1\nb: 2");
        let src = val("b: 99");
        merge_yaml(&mut dst, src);
        assert_eq!(dst["a"].as_i64(), Some(1));
        assert_eq!(dst["b"].as_i64(), Some(99));
    }

    #[test]
    fn load_explicit_file_expands_env_vars() {
        std::env::set_var("AGC_TEST_KEY", "shh");
        let env = EnvResolver::default();
        let mut f = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        writeln!(f, "providers:\n  p1:\n    kind: openai\n    api_key_env: \"${{AGC_TEST_KEY}}\"").unwrap();
        let cfg = load(Some(f.path()), &env).unwrap();
        assert_eq!(cfg.providers["p1"].api_key_env.as_deref(), Some("shh"));
        std::env::remove_var("AGC_TEST_KEY");
    }

    #[test]
    fn load_with_unresolved_var_errors_at_load_not_use() {
        let env = EnvResolver::new();
        let mut f = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        writeln!(f, "root_agent: \"${{TOTALLY_UNSET_VAR}}\"").unwrap();
        assert!(load(Some(f.path()), &env).is_err());
    }

    #[test]
    fn load_with_no_extra_path_returns_defaults() {
        let env = EnvResolver::default();
        let cfg = load(None, &env).unwrap();
        assert!(cfg.agents.is_empty());
    }
}
