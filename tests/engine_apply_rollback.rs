//! End-to-end apply/rollback flows through the coordinator.

use std::{fs, path::Path};

use proptest::prelude::*;
use swing_edit::core::{
    CoordinatorPaths, EditCoordinator, EditError, EngineSettings, FileMap, StrategyErrorKind,
    StrategyRegistry,
    strategy::{EditStrategy, UnifiedDiffStrategy, WholeFileStrategy},
};
use tempfile::tempdir;

/// Create a text file under root, parents included.
fn write_file(
    root: &Path,
    rel: &str,
    body: &str,
)
{
    let p = root.join(rel);
    if let Some(parent) = p.parent()
    {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(p, body.as_bytes()).unwrap();
}

fn read_file(
    root: &Path,
    rel: &str,
) -> String
{
    fs::read_to_string(root.join(rel)).unwrap()
}

/// Context map as the CLI would build it from disk.
fn context(
    root: &Path,
    rels: &[&str],
) -> FileMap
{
    rels.iter()
        .map(|r| (r.to_string(), read_file(root, r)))
        .collect()
}

fn registry() -> StrategyRegistry
{
    StrategyRegistry::with_defaults(&EngineSettings::default())
}

const ADD_PY: &str = "def add(a,b):\n    return a+b\n";

const SPACING_REPLY: &str = "Here is the fix:\n\nfoo.py\n```python\n<<<<<<< SEARCH\n    return a+b\n=======\n    return a + b\n>>>>>>> REPLACE\n```\n";

#[test]
fn search_replace_apply_then_rollback_restores_bytes()
{
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    write_file(root, "foo.py", ADD_PY);

    let reg = registry();
    let mut coord = EditCoordinator::new(&reg, &CoordinatorPaths::new(root));

    let preview = coord
        .preview("search-replace", SPACING_REPLY, &context(root, &["foo.py"]))
        .unwrap();
    assert_eq!(preview.files.len(), 1);
    assert!(
        preview.files[0]
            .diff
            .contains("+    return a + b")
    );
    // preview leaves disk alone
    assert_eq!(read_file(root, "foo.py"), ADD_PY);

    let op = coord
        .apply("search-replace", SPACING_REPLY, &context(root, &["foo.py"]), "")
        .unwrap();
    assert_eq!(read_file(root, "foo.py"), "def add(a,b):\n    return a + b\n");
    assert_eq!(op.description, "[search-replace] 1 file(s) modified");
    assert_eq!(op.changes[0].original_content, ADD_PY);

    assert!(coord.rollback(&op.operation_id));
    assert_eq!(fs::read(root.join("foo.py")).unwrap(), ADD_PY.as_bytes());
}

#[test]
fn applying_the_same_reply_twice_is_rejected()
{
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    write_file(root, "foo.py", ADD_PY);

    let reg = registry();
    let mut coord = EditCoordinator::new(&reg, &CoordinatorPaths::new(root));
    coord
        .apply("search-replace", SPACING_REPLY, &context(root, &["foo.py"]), "")
        .unwrap();

    let err = coord
        .apply("search-replace", SPACING_REPLY, &context(root, &["foo.py"]), "")
        .unwrap_err();
    assert!(matches!(err, EditError::ValidationFailure(_)));
    assert_eq!(
        err.strategy_error()
            .unwrap()
            .kind,
        StrategyErrorKind::NoMatchFound
    );
    assert_eq!(
        coord
            .history(10)
            .len(),
        1
    );
}

#[test]
fn unified_diff_insertion_adds_one_line()
{
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    write_file(root, "notes.txt", "alpha\nbeta\ngamma\n");

    let reply = "```diff\n--- a/notes.txt\n+++ b/notes.txt\n@@ -1,3 +1,4 @@\n alpha\n+inserted\n beta\n gamma\n```\n";
    let reg = registry();
    let mut coord = EditCoordinator::new(&reg, &CoordinatorPaths::new(root));
    let op = coord
        .apply("udiff", reply, &context(root, &["notes.txt"]), "insert a line")
        .unwrap();

    let after = read_file(root, "notes.txt");
    assert_eq!(after, "alpha\ninserted\nbeta\ngamma\n");
    assert_eq!(
        after
            .lines()
            .count(),
        4
    );
    assert_eq!(op.description, "[unified-diff] insert a line");
}

#[test]
fn whole_file_creates_new_file_with_parents()
{
    let tmp = tempdir().unwrap();
    let root = tmp.path();

    let reply = "pkg/sub/new.py\n```python\nprint('hello world')\n```\n";
    let reg = registry();
    let mut coord = EditCoordinator::new(&reg, &CoordinatorPaths::new(root));
    let op = coord
        .apply("whole-file", reply, &FileMap::new(), "")
        .unwrap();

    assert_eq!(read_file(root, "pkg/sub/new.py"), "print('hello world')\n");
    let change = &op.changes[0];
    assert_eq!(change.original_content, "");
    assert!(change.created_file());
    assert_eq!(fs::read_to_string(&change.backup_path).unwrap(), "");

    // rolling back a creation empties the file
    assert!(coord.rollback(&op.operation_id));
    assert_eq!(read_file(root, "pkg/sub/new.py"), "");
}

#[test]
fn unknown_operation_rollback_touches_nothing()
{
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    write_file(root, "keep.txt", "unchanged\n");

    let reg = registry();
    let coord = EditCoordinator::new(&reg, &CoordinatorPaths::new(root));
    assert!(!coord.rollback("unknown-id"));
    assert_eq!(read_file(root, "keep.txt"), "unchanged\n");
    assert!(!root.join(".swing_backups").exists());

    let err = coord
        .rollback_detailed("unknown-id")
        .unwrap_err();
    assert!(matches!(err, EditError::RollbackFailure { path: None, .. }));
}

#[test]
fn multi_file_operation_rolls_back_every_file()
{
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    write_file(root, "src/a.rs", "fn a() { 1 }\n");
    write_file(root, "src/b.rs", "fn b() { 2 }\r\n");

    let reply = "src/a.rs\n<<<<<<< SEARCH\nfn a() { 1 }\n=======\nfn a() { 10 }\n>>>>>>> REPLACE\n\nAnd the second file:\n\nsrc/b.rs\n<<<<<<< SEARCH\nfn b() { 2 }\n=======\nfn b() { 20 }\n>>>>>>> REPLACE\n";
    let reg = registry();
    let mut coord = EditCoordinator::new(&reg, &CoordinatorPaths::new(root));
    let op = coord
        .apply(
            "editblock",
            reply,
            &context(root, &["src/a.rs", "src/b.rs"]),
            "bump",
        )
        .unwrap();

    assert_eq!(
        op.changes
            .len(),
        2
    );
    assert_eq!(read_file(root, "src/a.rs"), "fn a() { 10 }\n");
    assert_eq!(read_file(root, "src/b.rs"), "fn b() { 20 }\r\n");

    let restored = coord
        .rollback_detailed(&op.operation_id)
        .unwrap();
    assert_eq!(
        restored.len(),
        2
    );
    assert_eq!(fs::read(root.join("src/a.rs")).unwrap(), b"fn a() { 1 }\n");
    assert_eq!(fs::read(root.join("src/b.rs")).unwrap(), b"fn b() { 2 }\r\n");
}

#[test]
fn history_survives_a_new_coordinator()
{
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    write_file(root, "foo.py", ADD_PY);

    let reg = registry();
    let id = {
        let mut coord = EditCoordinator::new(&reg, &CoordinatorPaths::new(root));
        coord
            .apply("search-replace", SPACING_REPLY, &context(root, &["foo.py"]), "first")
            .unwrap()
            .operation_id
    };

    let coord = EditCoordinator::new(&reg, &CoordinatorPaths::new(root));
    assert!(
        coord
            .history_warning()
            .is_none()
    );
    let ops = coord.history(5);
    assert_eq!(
        ops.len(),
        1
    );
    assert_eq!(ops[0].operation_id, id);
    assert!(coord.rollback(&id));
    assert_eq!(read_file(root, "foo.py"), ADD_PY);
}

fn body_line() -> impl Strategy<Value = String>
{
    "[a-z0-9 =;(){}]{1,30}"
}

proptest! {
    #[test]
    fn whole_file_reproduces_block_content(lines in prop::collection::vec(body_line(), 1..20))
    {
        let content: String = lines.iter().map(|l| format!("{l}\n")).collect();
        prop_assume!(content.len() >= 10);

        let reply = format!("Updated file:\n\nsrc/out.txt\n```\n{content}```\n");
        let strategy = WholeFileStrategy::new(&EngineSettings::default());
        let result = strategy.parse(&reply, &FileMap::new());
        prop_assert!(result.error.is_none());
        prop_assert!(strategy.validate(&result).is_ok());
        prop_assert_eq!(&result.files["src/out.txt"], &content);
    }

    #[test]
    fn hunk_order_does_not_change_the_result(
        order in prop::collection::btree_set(0usize..20, 1..6)
            .prop_flat_map(|set| Just(set.into_iter().collect::<Vec<_>>()).prop_shuffle())
    )
    {
        // every other line, so hunks never touch
        let original: String = (0..40).map(|i| format!("line{i}\n")).collect();
        let mut expected: Vec<String> = (0..40).map(|i| format!("line{i}")).collect();
        for &k in &order
        {
            expected[2 * k] = format!("changed{}", 2 * k);
        }
        let expected: String = expected.iter().map(|l| format!("{l}\n")).collect();

        let mut diff = String::from("--- a/data.txt\n+++ b/data.txt\n");
        for &k in &order
        {
            let i = 2 * k;
            diff.push_str(&format!("@@ -{n},1 +{n},1 @@\n-line{i}\n+changed{i}\n", n = i + 1));
        }

        let mut files = FileMap::new();
        files.insert("data.txt".to_string(), original);
        let strategy = UnifiedDiffStrategy::new();
        let result = strategy.parse(&diff, &files);
        prop_assert!(strategy.validate(&result).is_ok());
        prop_assert_eq!(result.stats.hunks_applied, order.len());
        prop_assert_eq!(&result.files["data.txt"], &expected);
    }
}
