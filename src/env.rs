//! Credential and environment lookup used by the `env` host module.

/// Resolves `(connection, suffix)` pairs to configuration strings.
pub trait EnvLookup: Send + Sync {
    fn get_env(&self, connection: &str, suffix: &str) -> Option<String>;
}

/// Reads `CONNECTION__SUFFIX` from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn get_env(&self, connection: &str, suffix: &str) -> Option<String> {
        std::env::var(variable_name(connection, suffix)).ok()
    }
}

/// `("my-slack", "token")` -> `MY_SLACK__TOKEN`
pub fn variable_name(connection: &str, suffix: &str) -> String {
    let normalize = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect()
    };
    format!("{}__{}", normalize(connection), normalize(suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_names_are_upper_cased_and_joined() {
        assert_eq!(variable_name("slack", "token"), "SLACK__TOKEN");
        assert_eq!(variable_name("my-slack", "api.key"), "MY_SLACK__API_KEY");
    }

    #[test]
    fn process_env_reads_the_joined_name() {
        std::env::set_var("TETHER_ENV_TEST__SECRET", "s3cret");
        assert_eq!(
            ProcessEnv.get_env("tether_env_test", "secret").as_deref(),
            Some("s3cret")
        );
        assert_eq!(ProcessEnv.get_env("tether_env_test", "missing"), None);
    }
}
