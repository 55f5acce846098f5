//! FileCheck-style tests over the `.rg` files in `tests/filetests`.

use std::fs;
use std::path::Path;

use dyncg::core::HelperRegistry;
use dyncg::text::FileTest;

fn run_filecheck_test(name: &str) {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/filetests").join(name);
    let contents = fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));

    let test = FileTest::parse(&contents)
        .unwrap_or_else(|e| panic!("Failed to parse test spec from {}: {}", name, e));

    let registry = HelperRegistry::new();
    if let Err(e) = test.run(&registry) {
        let output = test.output(&registry).unwrap_or_default();
        panic!("Test {} failed: {}\n--- output ---\n{}", name, e, output);
    }
}

#[test]
fn test_loop_filecheck() {
    run_filecheck_test("loop.rg");
}

#[test]
fn test_try_finally_filecheck() {
    run_filecheck_test("try_finally.rg");
}

#[test]
fn test_switch_table_filecheck() {
    run_filecheck_test("switch_table.rg");
}

#[test]
fn test_switch_chain_filecheck() {
    run_filecheck_test("switch_chain.rg");
}

#[test]
fn test_foreach_filecheck() {
    run_filecheck_test("foreach.rg");
}

#[test]
fn test_finally_return_filecheck() {
    run_filecheck_test("finally_return.rg");
}

/// Every fixture in the directory is covered by a test above.
#[test]
fn test_all_fixtures_listed() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/filetests");
    let mut names: Vec<String> = fs::read_dir(&dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".rg"))
        .collect();
    names.sort();
    assert_eq!(
        names,
        ["finally_return.rg", "foreach.rg", "loop.rg", "switch_chain.rg", "switch_table.rg", "try_finally.rg"]
    );
}
