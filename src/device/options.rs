//! Module build options.

use std::fmt;

/// Selects the alternate (vector compute) code generation path.
pub const ENABLE_VC_PATH: &str = "ENABLE_VC_PATH";
/// Selects the compatibility preset that mimics the offline compiler.
pub const MIMIC_OCLOC: &str = "MIMIC_OCLOC";
/// Raw build flags, passed through verbatim.
pub const COMPILE_IGC_FLAGS: &str = "COMPILE_IGC_FLAGS";

const ALT_CODEGEN_FLAGS: &str = "-vc-codegen";
const COMPATIBILITY_FLAGS: &str = "-ze-intel-has-buffer-offset-arg \
                                   -cl-intel-greater-than-4GB-buffer-required \
                                   -cl-store-cache-default=2 -cl-load-cache-default=4";

/// Flags handed to the device compiler when a module is built.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum BuildOptions {
    #[default]
    Default,
    AltCodegen,
    CompatibilityPreset,
    Raw(String),
}

impl BuildOptions {
    /// Resolve options from presence of the three variables; the most
    /// specific one wins: raw flags, then the preset, then the alternate
    /// code generation path.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(COMPILE_IGC_FLAGS) {
            return BuildOptions::Raw(raw);
        }
        if lookup(MIMIC_OCLOC).is_some() {
            return BuildOptions::CompatibilityPreset;
        }
        if lookup(ENABLE_VC_PATH).is_some() {
            return BuildOptions::AltCodegen;
        }
        BuildOptions::Default
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var_os(key).map(|v| v.to_string_lossy().into_owned()))
    }

    /// The flag string; empty for `Default`.
    pub fn flags(&self) -> &str {
        match self {
            BuildOptions::Default => "",
            BuildOptions::AltCodegen => ALT_CODEGEN_FLAGS,
            BuildOptions::CompatibilityPreset => COMPATIBILITY_FLAGS,
            BuildOptions::Raw(flags) => flags,
        }
    }
}

impl fmt::Display for BuildOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.flags() {
            "" => f.write_str("empty"),
            flags => f.write_str(flags),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(vars: &[(&str, &str)]) -> BuildOptions {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BuildOptions::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_no_variables() {
        let options = resolve(&[]);
        assert_eq!(options, BuildOptions::Default);
        assert_eq!(options.flags(), "");
        assert_eq!(options.to_string(), "empty");
    }

    #[test]
    fn test_presence_not_value() {
        assert_eq!(resolve(&[(ENABLE_VC_PATH, "")]).flags(), "-vc-codegen");
        assert_eq!(
            resolve(&[(MIMIC_OCLOC, "0")]),
            BuildOptions::CompatibilityPreset
        );
    }

    #[test]
    fn test_preset_beats_alt_codegen() {
        let options = resolve(&[(ENABLE_VC_PATH, "1"), (MIMIC_OCLOC, "1")]);
        assert!(options.flags().starts_with("-ze-intel-has-buffer-offset-arg "));
        assert!(options.flags().ends_with("-cl-load-cache-default=4"));
    }

    #[test]
    fn test_raw_flags_win() {
        let options = resolve(&[
            (ENABLE_VC_PATH, "1"),
            (MIMIC_OCLOC, "1"),
            (COMPILE_IGC_FLAGS, "-cl-opt-disable"),
        ]);
        assert_eq!(options, BuildOptions::Raw("-cl-opt-disable".to_string()));
        assert_eq!(options.flags(), "-cl-opt-disable");
    }

    #[test]
    fn test_compatibility_flags_are_single_spaced() {
        assert_eq!(
            BuildOptions::CompatibilityPreset.flags(),
            "-ze-intel-has-buffer-offset-arg -cl-intel-greater-than-4GB-buffer-required \
             -cl-store-cache-default=2 -cl-load-cache-default=4"
        );
    }
}
