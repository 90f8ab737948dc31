//! Turns command line descriptor groups into [`MachineSpec`]s.
//!
//! Arguments are split into groups at `--`; each group describes one machine:
//!
//! ```text
//! spinup 2G 4cpus centos :db1 -- 512M :web
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use spinup_machine::MachineSpec;
use spinup_system::{ClusterId, CpuCount, HardwareError, Hostname, MemorySize, MemoryUnit, OsVariant};
use thiserror::Error;
use tracing::debug;

pub const GROUP_SEPARATOR: &str = "--";

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("unrecognized token '{token}'")]
    UnknownToken { token: String },

    #[error("duplicate machine names: {}", names.join(", "))]
    DuplicateNames { names: Vec<String> },

    #[error("invalid value '{token}': {source}")]
    Hardware {
        token: String,
        #[source]
        source: HardwareError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorToken {
    Memory(MemorySize),
    Cpus(CpuCount),
    Variant(OsVariant),
    Name(String),
}

type Matcher = fn(&str) -> Option<Result<DescriptorToken, HardwareError>>;

/// Tried in order; the first matcher that recognizes a token wins.
const MATCHERS: &[(&str, Matcher)] = &[
    ("memory", match_memory),
    ("cpus", match_cpus),
    ("variant", match_variant),
    ("name", match_name),
];

fn leading_digits(token: &str) -> Option<(u64, &str)> {
    let end = token
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(token.len());
    if end == 0 {
        return None;
    }
    let quantity = token[..end].parse().ok()?;
    Some((quantity, &token[end..]))
}

fn match_memory(token: &str) -> Option<Result<DescriptorToken, HardwareError>> {
    let (quantity, unit) = leading_digits(token)?;
    let unit = MemoryUnit::parse(unit)?;
    Some(MemorySize::from_quantity(quantity, unit).map(DescriptorToken::Memory))
}

fn match_cpus(token: &str) -> Option<Result<DescriptorToken, HardwareError>> {
    let (count, rest) = leading_digits(token)?;
    if rest != "cpu" && rest != "cpus" {
        return None;
    }
    let count = u16::try_from(count).ok()?;
    Some(CpuCount::new(count).map(DescriptorToken::Cpus))
}

fn match_variant(token: &str) -> Option<Result<DescriptorToken, HardwareError>> {
    token.parse::<OsVariant>().ok().map(DescriptorToken::Variant).map(Ok)
}

fn match_name(token: &str) -> Option<Result<DescriptorToken, HardwareError>> {
    token
        .strip_prefix(':')
        .filter(|name| !name.is_empty())
        .map(|name| Ok(DescriptorToken::Name(name.to_owned())))
}

pub fn parse_token(token: &str) -> Result<DescriptorToken, DescriptorError> {
    let (kind, result) = MATCHERS
        .iter()
        .find_map(|(kind, matcher)| matcher(token).map(|result| (kind, result)))
        .ok_or_else(|| DescriptorError::UnknownToken {
            token: token.to_owned(),
        })?;
    debug!("token '{token}' matched {kind}");
    result.map_err(|source| DescriptorError::Hardware {
        token: token.to_owned(),
        source,
    })
}

fn apply(spec: &mut MachineSpec, token: DescriptorToken) {
    match token {
        DescriptorToken::Memory(memory) => spec.memory = memory,
        DescriptorToken::Cpus(cpus) => spec.cpus = cpus,
        DescriptorToken::Variant(variant) => {
            spec.os_type = variant.os_type();
            spec.os_variant = variant;
        }
        DescriptorToken::Name(name) => spec.name = name,
    }
}

/// Parse every group in `args` into machines that share one fresh cluster id.
pub fn parse_descriptors(
    args: &[String],
    source_dir: &Path,
) -> Result<Vec<MachineSpec>, DescriptorError> {
    parse_descriptors_for(args, ClusterId::generate(source_dir))
}

pub fn parse_descriptors_for(
    args: &[String],
    cluster_id: ClusterId,
) -> Result<Vec<MachineSpec>, DescriptorError> {
    let mut specs = args
        .split(|arg| arg == GROUP_SEPARATOR)
        .enumerate()
        .map(|(index, group)| {
            let mut spec = MachineSpec::new(index, cluster_id.clone());
            for token in group {
                apply(&mut spec, parse_token(token)?);
            }
            Ok(spec)
        })
        .collect::<Result<Vec<_>, DescriptorError>>()?;

    for spec in &mut specs {
        spec.hostname = Hostname::from(spec.name.clone());
    }
    assign_unique_macs(&mut specs);

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for spec in &specs {
        *counts.entry(spec.name.as_str()).or_default() += 1;
    }
    let duplicates: Vec<String> = counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(name, _)| name.to_owned())
        .collect();
    if !duplicates.is_empty() {
        return Err(DescriptorError::DuplicateNames { names: duplicates });
    }

    Ok(specs)
}

/// Reroll uuids until no two machines in the batch share a MAC address.
fn assign_unique_macs(specs: &mut [MachineSpec]) {
    let mut seen = HashSet::new();
    for spec in specs {
        while !seen.insert(spec.mac_address()) {
            debug!("mac {} repeats, new uuid for {}", spec.mac_address(), spec.name);
            spec.regenerate_uuid();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_owned).collect()
    }

    fn parse(line: &str) -> Result<Vec<MachineSpec>, DescriptorError> {
        parse_descriptors_for(&args(line), ClusterId::from("lab-0123456789ab".to_owned()))
    }

    #[test]
    fn full_group() {
        let specs = parse("2G 4cpus centos :db1").unwrap();
        assert_eq!(specs.len(), 1);
        let spec = &specs[0];
        assert_eq!(spec.memory.as_mib(), 2048);
        assert_eq!(spec.cpus.get(), 4);
        assert_eq!(spec.os_variant, OsVariant::Centos);
        assert_eq!(spec.os_variant.to_string(), "centos");
        assert_eq!(spec.name, "db1");
        assert_eq!(spec.hostname.as_ref(), "db1");
    }

    #[test]
    fn no_args_is_one_default_machine() {
        let specs = parse("").unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "machine-1");
        assert_eq!(specs[0].memory.as_mib(), 1024);
        assert_eq!(specs[0].os_variant, OsVariant::Ubuntu);
    }

    #[test]
    fn groups_share_cluster_id_and_number_names() {
        let specs = parse_descriptors(&args("debian -- fedora 1cpu"), Path::new("/srv/lab")).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "machine-1");
        assert_eq!(specs[1].name, "machine-2");
        assert_eq!(specs[0].cluster_id, specs[1].cluster_id);
        assert!(specs[0].cluster_id.to_string().starts_with("lab-"));
        assert_ne!(specs[0].uuid, specs[1].uuid);
    }

    #[test]
    fn memory_units() {
        for (token, mib) in [
            ("1M", 1),
            ("1m", 1),
            ("1MiB", 1),
            ("1mb", 1),
            ("3g", 3072),
            ("1T", 1 << 20),
            ("1048576B", 1),
            ("2048K", 2),
            ("1536kib", 1),
        ] {
            assert_eq!(
                parse_token(token).unwrap(),
                DescriptorToken::Memory(MemorySize::from_mib(mib).unwrap()),
                "{token}"
            );
        }
    }

    #[test]
    fn memory_below_one_mebibyte() {
        let err = parse("1048575B").unwrap_err();
        assert!(matches!(
            err,
            DescriptorError::Hardware {
                source: HardwareError::MemoryTooSmall { bytes: 1048575 },
                ..
            }
        ));
    }

    #[test]
    fn zero_cpus() {
        let err = parse("0cpus").unwrap_err();
        assert!(matches!(
            err,
            DescriptorError::Hardware {
                source: HardwareError::ZeroCpus,
                ..
            }
        ));
    }

    #[test]
    fn unknown_token_is_named() {
        let err = parse("2G windows :db1").unwrap_err();
        assert!(matches!(&err, DescriptorError::UnknownToken { token } if token == "windows"));
        assert_eq!(err.to_string(), "unrecognized token 'windows'");
    }

    #[test]
    fn malformed_tokens() {
        for token in ["4", "cpus", "4cores", ":", "Ubuntu", "2Q"] {
            assert!(
                matches!(parse_token(token), Err(DescriptorError::UnknownToken { .. })),
                "{token}"
            );
        }
    }

    #[test]
    fn duplicate_names() {
        let err = parse(":web -- :web -- :db -- :db -- :cache").unwrap_err();
        match err {
            DescriptorError::DuplicateNames { names } => assert_eq!(names, ["db", "web"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn explicit_name_colliding_with_default() {
        let err = parse(":machine-2 -- ubuntu").unwrap_err();
        assert!(
            matches!(err, DescriptorError::DuplicateNames { names } if names == ["machine-2"])
        );
    }

    #[test]
    fn later_tokens_override_earlier() {
        let specs = parse("1G 2G fedora debian").unwrap();
        assert_eq!(specs[0].memory.as_mib(), 2048);
        assert_eq!(specs[0].os_variant, OsVariant::Debian);
    }

    #[test]
    fn repeated_macs_get_new_uuids() {
        let mut specs = parse(":a -- :b -- :c").unwrap();
        let uuid = specs[0].uuid;
        for spec in &mut specs {
            spec.uuid = uuid;
        }
        assign_unique_macs(&mut specs);

        assert_eq!(specs[0].uuid, uuid);
        let macs: HashSet<String> = specs.iter().map(MachineSpec::mac_address).collect();
        assert_eq!(macs.len(), 3);
    }
}
