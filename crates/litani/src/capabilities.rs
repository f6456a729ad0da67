//! The capability list advertised by `print-capabilities`, used by callers
//! to feature-detect litani versions.

pub const CAPABILITIES: &[(&str, &str)] = &[
    (
        "atomic_report_update",
        "Report directory is rendered atomically",
    ),
    (
        "report_expire",
        "Old report directories will contain a .litani-expired file",
    ),
    ("dir_lock_api", "Deprecated"),
    (
        "dir_lock_api_v2",
        "litani-core contains the LockableDirectory API",
    ),
    ("outcome_table", "The --outcome-table flag is supported"),
    (
        "output_directory_flags",
        "The --output-directory --output-symlink and --output-prefix flags are supported",
    ),
    (
        "pools",
        "Jobs can be added to task pools to limit parallelism",
    ),
    (
        "memory_profile",
        "Litani can measure the memory usage of specific jobs",
    ),
    ("aux", "Run contains an aux field for custom user data"),
    (
        "parallelism_metric",
        "Run contains process parallelism measurements",
    ),
    ("phony_outputs", "The --phony-outputs flag is supported"),
    ("dump_run", "The dump-run command is supported"),
];

pub fn machine_readable() -> anyhow::Result<String> {
    let names: Vec<&str> = CAPABILITIES.iter().map(|(name, _)| *name).collect();
    Ok(serde_json::to_string_pretty(&names)?)
}

pub fn human_readable() -> String {
    let width = CAPABILITIES
        .iter()
        .map(|(name, _)| name.len())
        .max()
        .unwrap_or(0);
    CAPABILITIES
        .iter()
        .map(|(name, description)| format!("{name:>width$}:    {description}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_readable_is_a_json_array_of_tags() {
        let names: Vec<String> = serde_json::from_str(&machine_readable().unwrap()).unwrap();
        assert!(names.contains(&"atomic_report_update".to_string()));
        assert!(names.contains(&"dump_run".to_string()));
        assert_eq!(names.len(), CAPABILITIES.len());
    }

    #[test]
    fn human_readable_aligns_names() {
        let text = human_readable();
        let colons: Vec<usize> = text
            .lines()
            .map(|line| line.find(':').unwrap())
            .collect();
        assert!(colons.iter().all(|&c| c == colons[0]));
    }
}
