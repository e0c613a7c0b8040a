//! Typed flag registry and alias expansion.
//!
//! The `diff` command exposes three convenience flags (`--semantic`,
//! `--ignore-timestamps`, `--ignore-file-timestamps`) that switch on groups of
//! concrete flags. [`resolve_aliases`] applies them to a raw [`FlagSet`]
//! without touching clap, so the expansion rules can be tested on their own.
//!
//! Expansion only ever sets flags to `true`, which makes the three rules
//! commute: any evaluation order yields the same resolved set.

use std::collections::BTreeMap;

use crate::error::ConfigurationError;

/// Every boolean flag of the `diff` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Flag {
    IgnoreTimestamps,
    IgnoreHistory,
    IgnoreFileOrder,
    IgnoreFileModeRedundantBits,
    IgnoreFileTimestamps,
    IgnoreFileMtime,
    IgnoreFileAtime,
    IgnoreFileCtime,
    ExtraIgnoreFilePermissions,
    ExtraIgnoreFileMode,
    ExtraIgnoreFileContent,
    ExtraIgnoreLayerLengthMismatch,
    IgnoreImageTimestamps,
    IgnoreImageName,
    IgnoreTarFormat,
    TreatCanonicalPathsEqual,
    Semantic,
    Verbose,
}

impl Flag {
    pub const ALL: [Flag; 18] = [
        Flag::IgnoreTimestamps,
        Flag::IgnoreHistory,
        Flag::IgnoreFileOrder,
        Flag::IgnoreFileModeRedundantBits,
        Flag::IgnoreFileTimestamps,
        Flag::IgnoreFileMtime,
        Flag::IgnoreFileAtime,
        Flag::IgnoreFileCtime,
        Flag::ExtraIgnoreFilePermissions,
        Flag::ExtraIgnoreFileMode,
        Flag::ExtraIgnoreFileContent,
        Flag::ExtraIgnoreLayerLengthMismatch,
        Flag::IgnoreImageTimestamps,
        Flag::IgnoreImageName,
        Flag::IgnoreTarFormat,
        Flag::TreatCanonicalPathsEqual,
        Flag::Semantic,
        Flag::Verbose,
    ];

    /// The command-line spelling, without leading dashes.
    pub fn name(self) -> &'static str {
        match self {
            Flag::IgnoreTimestamps => "ignore-timestamps",
            Flag::IgnoreHistory => "ignore-history",
            Flag::IgnoreFileOrder => "ignore-file-order",
            Flag::IgnoreFileModeRedundantBits => "ignore-file-mode-redundant-bits",
            Flag::IgnoreFileTimestamps => "ignore-file-timestamps",
            Flag::IgnoreFileMtime => "ignore-file-mtime",
            Flag::IgnoreFileAtime => "ignore-file-atime",
            Flag::IgnoreFileCtime => "ignore-file-ctime",
            Flag::ExtraIgnoreFilePermissions => "extra-ignore-file-permissions",
            Flag::ExtraIgnoreFileMode => "extra-ignore-file-mode",
            Flag::ExtraIgnoreFileContent => "extra-ignore-file-content",
            Flag::ExtraIgnoreLayerLengthMismatch => "extra-ignore-layer-length-mismatch",
            Flag::IgnoreImageTimestamps => "ignore-image-timestamps",
            Flag::IgnoreImageName => "ignore-image-name",
            Flag::IgnoreTarFormat => "ignore-tar-format",
            Flag::TreatCanonicalPathsEqual => "treat-canonical-paths-equal",
            Flag::Semantic => "semantic",
            Flag::Verbose => "verbose",
        }
    }
}

/// Boolean flag values keyed by [`Flag`].
///
/// Only registered flags can be read or written; touching anything else is a
/// [`ConfigurationError::UnregisteredFlag`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagSet {
    values: BTreeMap<Flag, bool>,
}

impl FlagSet {
    /// A set with no flags registered.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A set with every [`Flag`] registered and `false`.
    pub fn registered() -> Self {
        let mut set = Self::empty();
        for flag in Flag::ALL {
            set.register(flag);
        }
        set
    }

    pub fn register(&mut self, flag: Flag) {
        self.values.entry(flag).or_insert(false);
    }

    pub fn set(&mut self, flag: Flag, value: bool) -> Result<(), ConfigurationError> {
        match self.values.get_mut(&flag) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(ConfigurationError::UnregisteredFlag(flag.name())),
        }
    }

    pub fn get(&self, flag: Flag) -> Result<bool, ConfigurationError> {
        self.values
            .get(&flag)
            .copied()
            .ok_or(ConfigurationError::UnregisteredFlag(flag.name()))
    }

    /// Builder-style [`FlagSet::set`], used when assembling raw sets.
    pub fn with(mut self, flag: Flag, value: bool) -> Result<Self, ConfigurationError> {
        self.set(flag, value)?;
        Ok(self)
    }
}

/// Convenience flags that expand into several concrete flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alias {
    Semantic,
    IgnoreTimestamps,
    IgnoreFileTimestamps,
}

impl Alias {
    /// Evaluation order used by [`resolve_aliases`].
    pub const ORDER: [Alias; 3] = [
        Alias::Semantic,
        Alias::IgnoreTimestamps,
        Alias::IgnoreFileTimestamps,
    ];

    pub fn flag(self) -> Flag {
        match self {
            Alias::Semantic => Flag::Semantic,
            Alias::IgnoreTimestamps => Flag::IgnoreTimestamps,
            Alias::IgnoreFileTimestamps => Flag::IgnoreFileTimestamps,
        }
    }

    pub fn targets(self) -> &'static [Flag] {
        match self {
            Alias::Semantic => &[
                Flag::IgnoreHistory,
                Flag::IgnoreFileOrder,
                Flag::IgnoreFileModeRedundantBits,
                Flag::IgnoreFileMtime,
                Flag::IgnoreFileAtime,
                Flag::IgnoreFileCtime,
                Flag::IgnoreImageTimestamps,
                Flag::IgnoreImageName,
                Flag::IgnoreTarFormat,
                Flag::TreatCanonicalPathsEqual,
            ],
            Alias::IgnoreTimestamps => &[
                Flag::IgnoreFileMtime,
                Flag::IgnoreFileAtime,
                Flag::IgnoreFileCtime,
                Flag::IgnoreImageTimestamps,
            ],
            Alias::IgnoreFileTimestamps => &[
                Flag::IgnoreFileMtime,
                Flag::IgnoreFileAtime,
                Flag::IgnoreFileCtime,
            ],
        }
    }
}

/// Expands alias flags in [`Alias::ORDER`].
pub fn resolve_aliases(raw: &FlagSet) -> Result<FlagSet, ConfigurationError> {
    resolve_aliases_in_order(raw, &Alias::ORDER)
}

/// Expands alias flags in the given order.
///
/// An alias is read from the set as it stands when the alias is reached, so
/// an alias switched on by an earlier expansion would also fire. None of the
/// current rules targets another alias.
pub fn resolve_aliases_in_order(
    raw: &FlagSet,
    order: &[Alias],
) -> Result<FlagSet, ConfigurationError> {
    let mut resolved = raw.clone();
    for alias in order {
        if !resolved.get(alias.flag())? {
            continue;
        }
        for target in alias.targets() {
            resolved.set(*target, true)?;
        }
    }
    Ok(resolved)
}
