//! Process-wide mutation policy.

/// Enables staged commit (variables are marked dirty and committed on `close`/`commit_variable`).
pub const STAGE_COMMIT_ENV: &str = "MCL_STAGE_COMMIT";
/// Rejects buffer arguments that do not resolve to a tracked allocation.
pub const DISABLE_SYSTEM_POINTER_KERNEL_ARGUMENT_ENV: &str = "MCL_DISABLE_SYSTEM_POINTER_KERNEL_ARGUMENT";
/// Always generates local IDs on the CPU.
pub const FORCE_SW_LOCAL_IDS_ENV: &str = "MCL_FORCE_SW_LOCAL_IDS";
/// Logs mutations at `debug` instead of `trace`.
pub const PRINT_DATA_ENV: &str = "MCL_PRINT_DATA";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MclConfig {
    pub stage_commit_mode: bool,
    pub disable_system_pointer_kernel_argument: bool,
    pub force_sw_local_ids: bool,
    pub print_data: bool,
}

impl Default for MclConfig {
    fn default() -> Self {
        Self {
            stage_commit_mode: true,
            disable_system_pointer_kernel_argument: false,
            force_sw_local_ids: false,
            print_data: false,
        }
    }
}

impl MclConfig {
    /// Defaults overridden by whichever `MCL_*` variables are set.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |name: &str, default: bool| lookup(name).map_or(default, |raw| is_truthy(&raw));
        let defaults = Self::default();
        Self {
            stage_commit_mode: flag(STAGE_COMMIT_ENV, defaults.stage_commit_mode),
            disable_system_pointer_kernel_argument: flag(
                DISABLE_SYSTEM_POINTER_KERNEL_ARGUMENT_ENV,
                defaults.disable_system_pointer_kernel_argument,
            ),
            force_sw_local_ids: flag(FORCE_SW_LOCAL_IDS_ENV, defaults.force_sw_local_ids),
            print_data: flag(PRINT_DATA_ENV, defaults.print_data),
        }
    }

    pub fn immediate() -> Self {
        Self {
            stage_commit_mode: false,
            ..Self::default()
        }
    }
}

fn is_truthy(raw: &str) -> bool {
    let v = raw.trim();
    v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes") || v.eq_ignore_ascii_case("on")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(vars: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |name| vars.iter().find(|(k, _)| *k == name).map(|(_, v)| v.to_string())
    }

    #[test]
    fn unset_variables_keep_defaults() {
        assert_eq!(MclConfig::from_lookup(lookup(&[])), MclConfig::default());
    }

    #[test]
    fn stage_commit_can_be_turned_off() {
        let cfg = MclConfig::from_lookup(lookup(&[(STAGE_COMMIT_ENV, "0")]));
        assert!(!cfg.stage_commit_mode);
    }

    #[test]
    fn truthy_spellings() {
        for raw in ["1", "true", "YES", " on "] {
            let cfg = MclConfig::from_lookup(|name| (name == FORCE_SW_LOCAL_IDS_ENV).then(|| raw.to_string()));
            assert!(cfg.force_sw_local_ids, "{raw:?}");
        }
        let cfg = MclConfig::from_lookup(lookup(&[(PRINT_DATA_ENV, "2")]));
        assert!(!cfg.print_data);
    }
}
