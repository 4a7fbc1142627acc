use assert_cmd::Command;

fn libris() -> Command {
    Command::cargo_bin("libris").unwrap()
}

#[test]
fn check_rate_echoes_parsed_rate() {
    let output = libris().args(["check-rate", "5/day"]).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("5 requests per 86400s"), "{stdout}");
}

#[test]
fn check_rate_rejects_unknown_unit() {
    libris()
        .args(["check-rate", "5/fortnight"])
        .assert()
        .failure();
}

#[test]
fn settings_prints_defaults_as_json() {
    let empty = std::env::temp_dir().join("libris-cli-no-config");
    let output = libris()
        .env_remove("LIBRIS_ENV")
        .args(["--config-dir", empty.to_str().unwrap(), "settings"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let settings: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(settings["circulation"]["max_active_borrows"], 5);
}
