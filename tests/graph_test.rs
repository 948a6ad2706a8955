//! Structural queries end to end: callers, callees, chains, and file
//! dependency lookups over an indexed tree.

mod common;

use pretty_assertions::assert_eq;
use rag_index::indexer::IndexOptions;
use rag_index::Error;

fn options() -> IndexOptions {
    IndexOptions {
        recursive: true,
        ..Default::default()
    }
}

async fn indexed_chain_workspace() -> common::TestWorkspace {
    let ws = common::workspace();
    ws.write(
        "chain.py",
        "def a():\n  b()\n\ndef b():\n  c()\n\ndef c():\n  pass\n",
    );
    ws.core.index_project("p", ws.root(), options()).await.unwrap();
    ws.core.switch_project("p").unwrap();
    ws
}

#[tokio::test]
async fn callees_walk_forward() {
    let ws = indexed_chain_workspace().await;
    let callees = ws.core.callees(Some("p"), "a", 2, true).unwrap();
    let names: Vec<&str> = callees.iter().map(|n| n.qualified_name.as_str()).collect();
    assert_eq!(names, vec!["b", "c"]);
}

#[tokio::test]
async fn callers_walk_backward() {
    let ws = indexed_chain_workspace().await;
    let callers = ws.core.callers(Some("p"), "c", 2, true).unwrap();
    let names: Vec<&str> = callers.iter().map(|n| n.qualified_name.as_str()).collect();
    assert_eq!(names, vec!["b", "a"]);
}

#[tokio::test]
async fn call_chain_enumerates_paths() {
    let ws = indexed_chain_workspace().await;
    let chains = ws.core.call_chain(Some("p"), "a", "c", 5, 1).unwrap();
    assert_eq!(
        chains,
        vec![vec!["a".to_string(), "b".to_string(), "c".to_string()]]
    );
}

#[tokio::test]
async fn depth_limits_apply() {
    let ws = indexed_chain_workspace().await;

    let direct = ws.core.callees(Some("p"), "a", 1, true).unwrap();
    assert_eq!(direct.len(), 1);
    assert_eq!(direct[0].qualified_name, "b");

    // include_indirect=false pins the walk to one hop regardless of depth.
    let shallow = ws.core.callees(Some("p"), "a", 10, false).unwrap();
    assert_eq!(shallow.len(), 1);
}

#[tokio::test]
async fn unknown_function_is_not_found() {
    let ws = indexed_chain_workspace().await;
    assert!(matches!(
        ws.core.callees(Some("p"), "ghost", 2, true),
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn edits_update_the_graph() {
    let ws = indexed_chain_workspace().await;

    // a now calls c directly; b loses its caller.
    ws.write(
        "chain.py",
        "def a():\n  c()\n\ndef b():\n  c()\n\ndef c():\n  pass\n",
    );
    ws.core.index_project("p", ws.root(), options()).await.unwrap();

    let callees = ws.core.callees(Some("p"), "a", 1, true).unwrap();
    let names: Vec<&str> = callees.iter().map(|n| n.qualified_name.as_str()).collect();
    assert_eq!(names, vec!["c"]);

    let callers = ws.core.callers(Some("p"), "c", 1, true).unwrap();
    let names: Vec<&str> = callers.iter().map(|n| n.qualified_name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);
}

#[tokio::test]
async fn deleting_a_file_removes_its_functions() {
    let ws = common::workspace();
    ws.write("lib.py", "def helper():\n  pass\n");
    ws.write("app.py", "from lib import helper\n\ndef main():\n  helper()\n");
    ws.core.index_project("p", ws.root(), options()).await.unwrap();
    ws.core.switch_project("p").unwrap();

    let callees = ws.core.callees(Some("p"), "main", 1, true).unwrap();
    assert_eq!(callees[0].name, "helper");

    std::fs::remove_file(ws.root().join("lib.py")).unwrap();
    ws.core.index_project("p", ws.root(), options()).await.unwrap();

    // helper's definition is gone; the call site survives as unresolved.
    let callees = ws.core.callees(Some("p"), "main", 1, true).unwrap();
    assert_eq!(callees.len(), 1);
    assert!(callees[0].file_path.is_empty());
}

#[tokio::test]
async fn dependencies_and_dependents_via_imports() {
    let ws = common::workspace();
    ws.write("util.py", "def shared():\n  pass\n");
    ws.write("app.py", "import util\n\ndef run():\n  util.shared()\n");
    ws.core.index_project("p", ws.root(), options()).await.unwrap();
    ws.core.switch_project("p").unwrap();

    let deps = ws.core.dependencies(Some("p"), "app.py");
    assert!(deps.contains(&"util".to_string()));

    let dependents = ws.core.dependents(Some("p"), "util.py");
    assert_eq!(dependents, vec!["app.py"]);
}

#[tokio::test]
async fn async_and_method_call_types_are_captured() {
    let ws = common::workspace();
    ws.write(
        "kinds.py",
        "async def runner():\n  await fetch()\n\nasync def fetch():\n  pass\n",
    );
    ws.core.index_project("p", ws.root(), options()).await.unwrap();
    ws.core.switch_project("p").unwrap();

    let callees = ws.core.callees(Some("p"), "runner", 1, true).unwrap();
    assert_eq!(callees.len(), 1);
    assert_eq!(callees[0].qualified_name, "fetch");
    assert!(callees[0].is_async);
}
