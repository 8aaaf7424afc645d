//! Migration Sources - Discovery, parsing and ordering of migrations
//!
//! Sources produce raw `Migration` units; `MigrationSet::build` filters them
//! for one dialect, resolves dialect-specific overrides and orders them.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use super::definitions::{Direction, Migration, MigrationContent, Version, MAX_VERSION_LEN};
use crate::backends::SqlDialect;
use crate::error::{MigrateResult, MigrationError};

/// Anything that can produce migration units
pub trait MigrationSource {
    /// All units, unfiltered and unordered
    fn migrations(&self) -> MigrateResult<Vec<Migration>>;
}

impl MigrationSource for [Migration] {
    fn migrations(&self) -> MigrateResult<Vec<Migration>> {
        Ok(self.to_vec())
    }
}

impl MigrationSource for Vec<Migration> {
    fn migrations(&self) -> MigrateResult<Vec<Migration>> {
        Ok(self.clone())
    }
}

/// Migrations stored as `.sql` files in one directory
#[derive(Debug, Clone)]
pub struct DirectorySource {
    path: PathBuf,
}

impl DirectorySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MigrationSource for DirectorySource {
    fn migrations(&self) -> MigrateResult<Vec<Migration>> {
        let io_error = |source| MigrationError::Io {
            path: self.path.clone(),
            source,
        };

        let mut migrations = Vec::new();
        for entry in fs::read_dir(&self.path).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if !path.is_file() || path.extension().map_or(true, |ext| ext != "sql") {
                continue;
            }

            let identifier = path
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| MigrationError::malformed(path.display().to_string(), "file name is not valid UTF-8"))?;
            let sql = fs::read_to_string(&path).map_err(|source| MigrationError::Io {
                path: path.clone(),
                source,
            })?;

            migrations.push(parse_migration(identifier, sql)?);
        }

        debug!(path = %self.path.display(), count = migrations.len(), "loaded migration files");
        Ok(migrations)
    }
}

/// Migrations compiled into the binary, typically with `include_str!`
#[derive(Debug, Clone, Default)]
pub struct EmbeddedSource {
    units: Vec<(&'static str, &'static str)>,
}

impl EmbeddedSource {
    pub fn new(units: impl IntoIterator<Item = (&'static str, &'static str)>) -> Self {
        Self {
            units: units.into_iter().collect(),
        }
    }
}

impl MigrationSource for EmbeddedSource {
    fn migrations(&self) -> MigrateResult<Vec<Migration>> {
        self.units
            .iter()
            .map(|(identifier, sql)| parse_migration(identifier, *sql))
            .collect()
    }
}

fn identifier_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^(?P<version>\d+)_(?P<name>[^.]+)(?P<tags>(?:\.[a-z0-9]+)*)\.(?P<direction>up|down)\.sql$")
            .expect("migration identifier pattern is valid")
    })
}

/// Parse `<version>_<name>[.<dialect>][.autocommit].<up|down>.sql`
pub fn parse_migration(identifier: &str, sql: impl Into<String>) -> MigrateResult<Migration> {
    let captures = identifier_regex().captures(identifier).ok_or_else(|| {
        MigrationError::malformed(identifier, "expected <version>_<name>[.<dialect>][.autocommit].<up|down>.sql")
    })?;

    let direction = match &captures["direction"] {
        "up" => Direction::Up,
        _ => Direction::Down,
    };

    let mut dialect = None;
    let mut transactional = true;
    for tag in captures["tags"].split('.').filter(|tag| !tag.is_empty()) {
        if tag == "autocommit" {
            if !transactional {
                return Err(MigrationError::malformed(identifier, "`autocommit` given twice"));
            }
            transactional = false;
            continue;
        }
        if dialect.is_some() {
            return Err(MigrationError::malformed(identifier, "more than one dialect tag"));
        }
        dialect = match tag {
            "all" => Some(None),
            _ => Some(Some(SqlDialect::from_tag(tag).ok_or_else(|| {
                MigrationError::malformed(identifier, format!("unknown dialect `{}`", tag))
            })?)),
        };
    }

    Ok(Migration {
        version: Version::new(&captures["version"]),
        name: captures["name"].to_string(),
        direction,
        dialect: dialect.flatten(),
        content: MigrationContent::Statements(sql.into()),
        transactional,
        identifier: identifier.to_string(),
    })
}

/// Ordered, deduplicated migrations for one dialect
#[derive(Debug, Clone)]
pub struct MigrationSet {
    dialect: SqlDialect,
    ups: Vec<Migration>,
    downs: BTreeMap<Version, Migration>,
}

impl MigrationSet {
    pub fn from_source(source: &(impl MigrationSource + ?Sized), dialect: SqlDialect) -> MigrateResult<Self> {
        Self::build(source.migrations()?, dialect)
    }

    /// Filter for `dialect`, let dialect-specific units override generic ones,
    /// reject duplicates and order by version.
    pub fn build(units: Vec<Migration>, dialect: SqlDialect) -> MigrateResult<Self> {
        let mut ups: BTreeMap<Version, Migration> = BTreeMap::new();
        let mut downs: BTreeMap<Version, Migration> = BTreeMap::new();

        for unit in units {
            // Checked before dialect filtering so a set is valid or invalid on every dialect
            if unit.version.as_str().len() > MAX_VERSION_LEN {
                return Err(MigrationError::malformed(
                    unit.identifier,
                    format!("version is longer than {} characters", MAX_VERSION_LEN),
                ));
            }
            if !unit.applies_to(dialect) {
                debug!(identifier = %unit.identifier, %dialect, "skipping migration for another dialect");
                continue;
            }

            let slot = match unit.direction {
                Direction::Up => &mut ups,
                Direction::Down => &mut downs,
            };

            match slot.entry(unit.version.clone()) {
                Entry::Vacant(entry) => {
                    entry.insert(unit);
                }
                Entry::Occupied(mut entry) => {
                    let existing = entry.get();
                    match (existing.dialect.is_some(), unit.dialect.is_some()) {
                        (false, true) => {
                            entry.insert(unit);
                        }
                        (true, false) => {}
                        _ => {
                            return Err(MigrationError::DuplicateVersion {
                                version: unit.version.to_string(),
                                direction: unit.direction,
                                first: existing.identifier.clone(),
                                second: unit.identifier,
                            })
                        }
                    }
                }
            }
        }

        let mut matched_downs = BTreeMap::new();
        for (version, down) in downs {
            match ups.get(&version) {
                Some(up) if up.name != down.name => {
                    return Err(MigrationError::malformed(
                        down.identifier,
                        format!("down migration name does not match up migration `{}`", up.identifier),
                    ));
                }
                Some(_) => {
                    matched_downs.insert(version, down);
                }
                None => {
                    debug!(identifier = %down.identifier, %dialect, "dropping down migration without an up migration");
                }
            }
        }

        Ok(Self {
            dialect,
            ups: ups.into_values().collect(),
            downs: matched_downs,
        })
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// Up migrations in ascending version order
    pub fn ups(&self) -> &[Migration] {
        &self.ups
    }

    /// Up migrations in descending version order
    pub fn ups_descending(&self) -> impl Iterator<Item = &Migration> {
        self.ups.iter().rev()
    }

    pub fn up(&self, version: &Version) -> Option<&Migration> {
        self.ups
            .binary_search_by(|m| m.version.cmp(version))
            .ok()
            .map(|index| &self.ups[index])
    }

    /// The Down migration matching `up` by version and name
    pub fn down_for(&self, up: &Migration) -> Option<&Migration> {
        self.downs
            .get(&up.version)
            .filter(|down| down.name == up.name)
    }

    pub fn len(&self) -> usize {
        self.ups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ups.is_empty()
    }
}
