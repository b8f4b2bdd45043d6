use std::io::Write;
use std::process::Command;

fn netd() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_xenon-netd"));
    cmd.env_remove("XENON_NET_CONFIG")
        .env_remove("XENON_NET_BACKEND")
        .env_remove("XENON_NET_BACKEND_CONFIG")
        .env_remove("XENON_NET_MAC")
        .env("RUST_LOG", "info");
    cmd
}

#[test]
fn null_backend_run_exits_cleanly() {
    let out = netd()
        .args(["--backend", "none", "--duration-secs", "0", "--guest-ram-mib", "16"])
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
}

#[test]
fn config_file_is_honoured() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{ "enabled": true, "backend": "none" }}"#).unwrap();

    let out = netd()
        .arg("--config")
        .arg(file.path())
        .args(["--duration-secs", "0"])
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
}

#[test]
fn unavailable_backend_is_not_fatal() {
    let out = netd()
        .args(["--backend", "pcap", "--duration-secs", "0"])
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
}

#[test]
fn malformed_config_fails() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{ "backend": "carrier-pigeon" }}"#).unwrap();

    let out = netd()
        .arg("--config")
        .arg(file.path())
        .args(["--duration-secs", "0"])
        .output()
        .unwrap();
    assert!(!out.status.success());
}

#[test]
fn list_devices_exits_without_running() {
    let out = netd().arg("--list-devices").output().unwrap();
    assert!(out.status.success());
}
