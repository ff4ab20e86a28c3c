use std::fs;
use std::path::{Path, PathBuf};

fn rs_files(root: &Path) -> Vec<PathBuf> {
    if root.is_file() {
        return vec![root.to_path_buf()];
    }
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().and_then(|s| s.to_str()) == Some("rs") {
                out.push(path);
            }
        }
    }
    out.sort();
    out
}

fn rel(path: &Path) -> String {
    let root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let rel = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string();
    rel.replace('\\', "/")
}

fn violations_in(dir: &str, forbidden: &[&str]) -> Vec<String> {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join(dir);
    let mut violations = Vec::new();
    for file in rs_files(&root) {
        let content = fs::read_to_string(&file).unwrap_or_default();
        for needle in forbidden {
            if content.contains(needle) {
                violations.push(format!("{} references `{}`", rel(&file), needle));
            }
        }
    }
    violations
}

#[test]
fn health_scoring_is_pure() {
    let violations = violations_in(
        "src/health.rs",
        &["crate::system::ops", "crate::system::platform", "sysinfo", "tokio"],
    );
    assert!(
        violations.is_empty(),
        "Health layering violations:\n{}",
        violations.join("\n")
    );
}

#[test]
fn advisor_reaches_the_os_only_through_system_ops() {
    let violations = violations_in(
        "src/advisor",
        &["crate::system::platform", "crate::system::native", "sysinfo::"],
    );
    assert!(
        violations.is_empty(),
        "Advisor/platform boundary violations:\n{}",
        violations.join("\n")
    );
}

#[test]
fn executor_and_catalog_do_not_import_platform_extensions_directly() {
    let mut violations = violations_in("src/executor.rs", &["crate::system::platform"]);
    violations.extend(violations_in("src/catalog.rs", &["crate::system::platform"]));
    assert!(
        violations.is_empty(),
        "Executor/platform boundary violations:\n{}",
        violations.join("\n")
    );
}

#[test]
fn target_os_cfg_is_scoped_to_system_platform() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");
    let mut violations = Vec::new();

    for file in rs_files(&root) {
        let content = fs::read_to_string(&file).unwrap_or_default();
        if !content.contains("target_os") {
            continue;
        }

        let rel_path = rel(&file);
        if !rel_path.starts_with("src/system/platform/") {
            violations.push(format!(
                "{} contains `target_os` cfg but is outside allowed boundary",
                rel_path
            ));
        }
    }

    assert!(
        violations.is_empty(),
        "Unexpected target_os cfg usage:\n{}",
        violations.join("\n")
    );
}
