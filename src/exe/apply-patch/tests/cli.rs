use assert_cmd::Command;
use std::fs;
use tempfile::tempdir;

#[test]
fn applies_patch_from_stdin() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("greet.py"), "print(\"hi\")\n").expect("write");

    let patch = "*** Begin Patch\n*** update: greet.py\nold_text:\nprint(\"hi\")\nnew_text:\nprint(\"hello\")\n*** End Patch\n";
    Command::cargo_bin("apply_patch")
        .expect("binary")
        .current_dir(dir.path())
        .write_stdin(patch)
        .assert()
        .success()
        .stdout("Patch applied successfully.\nUpdated text in: greet.py\n");

    assert_eq!(
        fs::read_to_string(dir.path().join("greet.py")).expect("read"),
        "print(\"hello\")\n"
    );
}

#[test]
fn accepts_patch_as_argument() {
    let dir = tempdir().expect("tempdir");
    Command::cargo_bin("apply_patch")
        .expect("binary")
        .current_dir(dir.path())
        .arg("*** Begin Patch\n*** create: notes/todo.md\n- item\n*** End Patch")
        .assert()
        .success();

    assert_eq!(
        fs::read_to_string(dir.path().join("notes/todo.md")).expect("read"),
        "- item"
    );
}

#[test]
fn exits_nonzero_when_an_operation_fails() {
    let dir = tempdir().expect("tempdir");
    Command::cargo_bin("apply_patch")
        .expect("binary")
        .current_dir(dir.path())
        .write_stdin("*** Begin Patch\n*** delete: nope.txt\nold_text:\nx\n*** End Patch")
        .assert()
        .failure()
        .stdout("Some patch operations failed.\nFile does not exist: nope.txt\n");
}

#[test]
fn reports_missing_blocks() {
    Command::cargo_bin("apply_patch")
        .expect("binary")
        .write_stdin("nothing to see")
        .assert()
        .failure()
        .stdout("Error: No patch blocks found in input\n");
}
