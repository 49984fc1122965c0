use assert_cmd::Command;
use predicates::prelude::*;
use std::{fs, path::Path};
use tempfile::TempDir;

/// `rewind` in batch mode, with all of its state inside `dir`.
fn rewind_batch(dir: &Path, script: &str) -> Command {
    let mut cmd = Command::cargo_bin("rewind").unwrap();
    cmd.current_dir(dir)
        .env_remove("REWIND_LOG")
        .arg("-b")
        .arg("-k")
        .arg("--state-dir")
        .arg(dir.join("state"))
        .arg("--handoff-file")
        .arg(dir.join("handoff"))
        .arg(script);
    cmd
}

fn write_script(dir: &TempDir, name: &str, source: &str) {
    fs::write(dir.path().join(name), source).unwrap();
}

#[test]
fn batch_run_writes_the_transcript() {
    let tmp = tempfile::tempdir().unwrap();
    write_script(&tmp, "prog.py", "x = 1\nx = 2\ndef f():\n    y = 3\nf()\nprint(x)\n");

    rewind_batch(tmp.path(), "prog.py")
        .assert()
        .success()
        .stdout(predicate::str::contains("2\n"));

    let t = fs::read_to_string(tmp.path().join("prog.trace.txt")).unwrap();
    let pos = |needle: &str| {
        t.find(needle)
            .unwrap_or_else(|| panic!("{:?} not in transcript:\n{}", needle, t))
    };
    assert!(t.starts_with("---------------------- call ----------------------\n"));
    assert!(pos("\"filename\": \"prog.py\"") < pos("\"x\": 1"));
    assert!(pos("\"x\": 1") < pos("\"x\": 2"));
    assert!(pos("\"x\": 2") < pos("calling f"));
    assert!(pos("calling f") < pos("\"y\": 3"));
    assert!(pos("\"y\": 3") < pos("f returned None"));

    // Nothing is left behind for the next session.
    assert_eq!("", fs::read_to_string(tmp.path().join("handoff")).unwrap());
    assert_eq!(0, fs::read_dir(tmp.path().join("state")).unwrap().count());
}

#[test]
fn local_imports_are_traced() {
    let tmp = tempfile::tempdir().unwrap();
    write_script(&tmp, "helper.py", "def twice(n):\n    m = n * 2\n    return m\n");
    write_script(&tmp, "main.py", "import helper\nz = helper.twice(21)\n");

    rewind_batch(tmp.path(), "main.py").assert().success();

    let t = fs::read_to_string(tmp.path().join("main.trace.txt")).unwrap();
    assert!(t.contains("\"filename\": \"helper.py\""), "{}", t);
    assert!(t.contains("twice returned 42"), "{}", t);
    assert!(t.contains("\"z\": 42"), "{}", t);
}

#[test]
fn missing_script() {
    let tmp = tempfile::tempdir().unwrap();
    rewind_batch(tmp.path(), "nope.py")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("does not exist or is a directory."));
}

#[test]
fn directory_is_not_a_script() {
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir(tmp.path().join("pkg")).unwrap();
    rewind_batch(tmp.path(), "pkg")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("does not exist or is a directory."));
}

#[test]
fn syntax_error_stops_before_running() {
    let tmp = tempfile::tempdir().unwrap();
    write_script(&tmp, "bad.py", "x = (1,\n");
    rewind_batch(tmp.path(), "bad.py")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("SyntaxError"));
    assert!(!tmp.path().join("bad.trace.txt").exists());
}

#[test]
fn uncaught_exception_prints_a_traceback() {
    let tmp = tempfile::tempdir().unwrap();
    write_script(&tmp, "boom.py", "def f():\n    raise ValueError(\"bad\")\nf()\n");
    rewind_batch(tmp.path(), "boom.py")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Traceback (most recent call last):"))
        .stderr(predicate::str::contains("ValueError: bad"));

    // The transcript is still written on the way out.
    let t = fs::read_to_string(tmp.path().join("boom.trace.txt")).unwrap();
    assert!(t.contains("-- exception --"), "{}", t);
}

#[test]
fn dump_ast() {
    let tmp = tempfile::tempdir().unwrap();
    write_script(&tmp, "prog.py", "x = 1\n");
    Command::cargo_bin("rewind")
        .unwrap()
        .current_dir(tmp.path())
        .arg("--dump-ast")
        .arg("prog.py")
        .assert()
        .success();
    let ast = fs::read_to_string(tmp.path().join("prog.ast.txt")).unwrap();
    assert!(ast.starts_with("Module {"), "{}", ast);
}

#[test]
fn usage_errors() {
    Command::cargo_bin("rewind")
        .unwrap()
        .assert()
        .failure()
        .stderr(predicate::str::contains("USAGE"));
    Command::cargo_bin("rewind")
        .unwrap()
        .args(&["-i", "-b", "x.py"])
        .assert()
        .failure();
}

#[test]
fn prompts_are_answered_from_stdin() {
    let tmp = tempfile::tempdir().unwrap();
    write_script(&tmp, "prog.py", "x = 1\n");
    // Empty answers: batch mode, keep state.
    Command::cargo_bin("rewind")
        .unwrap()
        .current_dir(tmp.path())
        .arg("--state-dir")
        .arg(tmp.path().join("state"))
        .arg("prog.py")
        .write_stdin("\n\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Step through? "))
        .stdout(predicate::str::contains("Wipe checkpoint state? "));
    assert!(tmp.path().join("prog.trace.txt").exists());
}

/// `rewind` stepping interactively, with all of its state inside `dir`.
fn rewind_interactive(dir: &Path, options: &[&str], script: &str) -> Command {
    let mut cmd = Command::cargo_bin("rewind").unwrap();
    cmd.current_dir(dir)
        .env_remove("REWIND_LOG")
        .arg("-i")
        .arg("-k")
        .arg("--state-dir")
        .arg(dir.join("state"))
        .arg("--handoff-file")
        .arg(dir.join("handoff"))
        .args(options)
        .arg(script);
    cmd
}

fn stdout_of(assert: &assert_cmd::assert::Assert) -> String {
    String::from_utf8(assert.get_output().stdout.clone()).unwrap()
}

/// Checkpoint ids of the pause points shown, in order.
fn checkpoints_shown(stdout: &str) -> Vec<u64> {
    stdout
        .lines()
        .filter_map(|l| l.trim().strip_prefix("\"checkpoint\": "))
        .map(|n| n.parse().unwrap())
        .collect()
}

/// The `globals` object of every change report, in order.
fn global_changes(stdout: &str) -> Vec<&str> {
    stdout
        .match_indices("\"globals\": {")
        .map(|(i, _)| {
            let rest = &stdout[i..];
            &rest[..rest.find("\n    }").unwrap()]
        })
        .collect()
}

const FOUR_LINES: &str = "a = 1\nb = 2\nc = 3\nd = 4\n";

const ERASE: &str = "\x7f";

#[test]
fn rewinding_twice_steps_back_twice() {
    let tmp = tempfile::tempdir().unwrap();
    write_script(&tmp, "prog.py", FOUR_LINES);
    let keys = format!("\n\n{}{}\n\n\n\n", ERASE, ERASE);
    let assert = rewind_interactive(tmp.path(), &[], "prog.py")
        .write_stdin(keys)
        .assert()
        .success();

    // Rewinding from 2 shows 1, then 0; new checkpoints carry on from 3.
    assert_eq!(
        vec![0, 1, 2, 1, 0, 3, 4, 5],
        checkpoints_shown(&stdout_of(&assert))
    );
    assert_eq!("", fs::read_to_string(tmp.path().join("handoff")).unwrap());
    assert_eq!(0, fs::read_dir(tmp.path().join("state")).unwrap().count());
}

#[test]
fn rewinding_at_the_first_checkpoint_goes_nowhere() {
    let tmp = tempfile::tempdir().unwrap();
    write_script(&tmp, "prog.py", FOUR_LINES);
    let keys = format!("{}\n\n\n\n", ERASE);
    let assert = rewind_interactive(tmp.path(), &[], "prog.py")
        .write_stdin(keys)
        .assert()
        .success()
        .stdout(predicate::str::contains("cannot rewind past the start"));
    assert_eq!(vec![0, 1, 2, 3], checkpoints_shown(&stdout_of(&assert)));
}

#[test]
fn jumping_back_replays_the_same_changes() {
    let tmp = tempfile::tempdir().unwrap();
    write_script(&tmp, "prog.py", "x = 1\ny = x + 1\nx = 10\npass\n");
    let assert = rewind_interactive(tmp.path(), &[], "prog.py")
        .write_stdin("\n\n\n1\n\n\n\n")
        .assert()
        .success();
    let stdout = stdout_of(&assert);
    assert_eq!(vec![0, 1, 2, 3, 1, 4, 5], checkpoints_shown(&stdout));

    let changes = global_changes(&stdout);
    assert_eq!(5, changes.len(), "{}", stdout);
    assert!(changes[0].contains("\"x\": 1"), "{}", stdout);
    assert!(changes[1].contains("\"y\": 2"), "{}", stdout);
    assert!(changes[2].contains("\"x\": 10"), "{}", stdout);
    assert_eq!(changes[1..3], changes[3..5]);
}

#[test]
fn evicted_checkpoints_end_the_session() {
    let tmp = tempfile::tempdir().unwrap();
    write_script(&tmp, "prog.py", FOUR_LINES);
    let options = ["--max-checkpoints", "2"];

    let assert = rewind_interactive(tmp.path(), &options, "prog.py")
        .write_stdin("\n\n\n0\n")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("No checkpoint 0"));
    assert_eq!(vec![0, 1, 2, 3], checkpoints_shown(&stdout_of(&assert)));

    // The newest two are still there.
    let assert = rewind_interactive(tmp.path(), &options, "prog.py")
        .write_stdin("\n\n\n2\n\n\n")
        .assert()
        .success();
    assert_eq!(
        vec![0, 1, 2, 3, 2, 4],
        checkpoints_shown(&stdout_of(&assert))
    );
}

#[test]
fn end_of_input_interrupts() {
    let tmp = tempfile::tempdir().unwrap();
    write_script(&tmp, "prog.py", FOUR_LINES);
    let assert = rewind_interactive(tmp.path(), &[], "prog.py")
        .write_stdin("\n")
        .assert()
        .code(1);
    assert_eq!(vec![0, 1], checkpoints_shown(&stdout_of(&assert)));
}
