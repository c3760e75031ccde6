#![cfg(unix)]

use serde_json::{json, Value};
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

const PLUGIN: &str = env!("CARGO_BIN_EXE_dummy-cni");
const NETNS: &str = "/var/run/netns/test";

/// A directory holding a fake IPAM plugin named `fake-ipam` and the log file of the plugin.
struct Fixture {
    dir: TempDir,
}

impl Fixture {
    /// Installs a fake IPAM plugin. `body` runs after the network configuration and
    /// the command were recorded to `stdin` and `command` in the fixture directory.
    fn new(body: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let script = format!(
            "#!/bin/sh\ncat > {dir}/stdin\necho \"$CNI_COMMAND\" >> {dir}/command\n{body}\n",
            dir = dir.path().display()
        );
        let path = dir.path().join("fake-ipam");
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn log_file(&self) -> PathBuf {
        self.path().join("log/dummy-cni.log")
    }

    fn net_conf(&self, version: &str) -> String {
        format!(
            r#"{{
  "cniVersion": "{version}",
  "name": "test-network",
  "type": "dummy-cni",
  "ipam": {{"type": "fake-ipam", "subnet": "10.0.0.0/24"}},
  "log": {{"level": "debug", "file": "{}"}}
}}"#,
            self.log_file().display()
        )
    }

    fn recorded(&self, name: &str) -> String {
        fs::read_to_string(self.path().join(name)).unwrap_or_default()
    }

    fn run(&self, command: &str, net_conf: &str) -> (bool, String, String) {
        let mut child = Command::new(PLUGIN)
            .env("CNI_COMMAND", command)
            .env("CNI_CONTAINERID", "container-123")
            .env("CNI_NETNS", NETNS)
            .env("CNI_IFNAME", "eth0")
            .env("CNI_ARGS", "IgnoreUnknown=1;K8S_POD_NAME=web-0")
            .env("CNI_PATH", format!("/nonexistent:{}", self.path().display()))
            .env_remove("RUST_LOG")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("Failed to spawn plugin process");

        // VERSION doesn't read stdin, so we only write for other commands
        // to avoid BrokenPipe errors when the plugin exits before reading
        if command != "VERSION" {
            let stdin = child.stdin.as_mut().expect("Failed to open stdin");
            stdin
                .write_all(net_conf.as_bytes())
                .expect("Failed to write to stdin");
        }

        let output = child.wait_with_output().expect("Failed to wait for plugin");
        (
            output.status.success(),
            String::from_utf8_lossy(&output.stdout).to_string(),
            String::from_utf8_lossy(&output.stderr).to_string(),
        )
    }
}

#[test]
fn test_plugin_add_command() {
    let fixture = Fixture::new(
        r#"printf '{"cniVersion":"1.0.0","ips":[{"address":"10.0.0.5/24","gateway":"10.0.0.1"}],"routes":[{"dst":"0.0.0.0/0"}],"dns":{"nameservers":["10.0.0.1"]}}'"#,
    );
    let net_conf = fixture.net_conf("1.0.0");

    let (success, stdout, stderr) = fixture.run("ADD", &net_conf);

    assert!(success, "Plugin failed: {stdout} {stderr}");
    let result: Value = serde_json::from_str(&stdout).expect("Failed to parse result");
    assert_json_diff::assert_json_eq!(
        result,
        json!({
            "cniVersion": "1.0.0",
            "interfaces": [{"name": "test-network", "sandbox": NETNS}],
            "ips": [{"address": "10.0.0.5/24", "gateway": "10.0.0.1", "interface": 0}],
            "routes": [{"dst": "0.0.0.0/0"}],
            "dns": {"nameservers": ["10.0.0.1"]}
        })
    );

    assert_eq!(fixture.recorded("stdin"), net_conf);
    assert_eq!(fixture.recorded("command").trim(), "ADD");

    let log = fixture.recorded("log/dummy-cni.log");
    assert!(log.contains("container-123"), "{log}");
    assert!(log.contains("web-0"), "{log}");
    assert!(log.contains("10.0.0.5/24"), "{log}");
}

#[test]
fn test_plugin_add_legacy_ipam_result() {
    let fixture = Fixture::new(
        r#"printf '{"cniVersion":"0.2.0","ip4":{"ip":"10.0.0.5/24","gateway":"10.0.0.1"}}'"#,
    );

    let (success, stdout, stderr) = fixture.run("ADD", &fixture.net_conf("0.4.0"));

    assert!(success, "Plugin failed: {stdout} {stderr}");
    let result: Value = serde_json::from_str(&stdout).expect("Failed to parse result");
    assert_eq!(result["cniVersion"], "0.4.0");
    assert_json_diff::assert_json_eq!(
        result["ips"],
        json!([{"version": "4", "address": "10.0.0.5/24", "gateway": "10.0.0.1", "interface": 0}])
    );
}

#[test]
fn test_plugin_add_without_addresses() {
    let fixture = Fixture::new(r#"printf '{"cniVersion":"1.0.0","ips":[]}'"#);

    let (success, stdout, _) = fixture.run("ADD", &fixture.net_conf("1.0.0"));

    assert!(!success);
    assert_json_diff::assert_json_eq!(
        serde_json::from_str::<Value>(&stdout).expect("Failed to parse error"),
        json!({
            "cniVersion": "1.0.0",
            "code": 999,
            "msg": "Invalid IPAM result",
            "details": "IPAM plugin returned missing IP configuration"
        })
    );
}

#[test]
fn test_plugin_del_command() {
    let fixture = Fixture::new("exit 0");

    let (success, stdout, stderr) = fixture.run("DEL", &fixture.net_conf("1.1.0"));

    assert!(success, "Plugin failed: {stdout} {stderr}");
    assert!(stdout.is_empty(), "DEL should print nothing: {stdout}");
    assert_eq!(fixture.recorded("command").trim(), "DEL");
}

#[test]
fn test_plugin_del_delegate_failure() {
    let fixture = Fixture::new(
        r#"printf '{"cniVersion":"1.1.0","code":3,"msg":"not found","details":"no allocation for container-123"}'
exit 1"#,
    );

    let (success, stdout, _) = fixture.run("DEL", &fixture.net_conf("1.1.0"));

    assert!(!success);
    let err: Value = serde_json::from_str(&stdout).expect("Failed to parse error");
    assert_eq!(err["code"], 3);
    assert_eq!(err["msg"], "not found");
    assert_eq!(err["details"], "no allocation for container-123");
}

#[test]
fn test_plugin_check_command() {
    let fixture = Fixture::new("exit 0");

    let (success, stdout, stderr) = fixture.run("CHECK", &fixture.net_conf("1.1.0"));

    assert!(success, "Plugin failed: {stdout} {stderr}");
    assert!(stdout.is_empty());
    assert_eq!(fixture.recorded("command").trim(), "CHECK");
}

#[test]
fn test_plugin_check_delegate_failure() {
    let fixture = Fixture::new("echo 'lease expired' >&2\nexit 1");

    let (success, stdout, _) = fixture.run("CHECK", &fixture.net_conf("1.1.0"));

    assert!(!success);
    let err: Value = serde_json::from_str(&stdout).expect("Failed to parse error");
    assert_eq!(err["code"], 999);
    assert!(err["details"].as_str().unwrap().contains("lease expired"));
}

#[test]
fn test_plugin_invalid_config_skips_ipam() {
    let fixture = Fixture::new("exit 0");

    let (success, stdout, _) = fixture.run("ADD", r#"{"cniVersion":"1.0.0","name":"test"}"#);

    assert!(!success);
    let err: Value = serde_json::from_str(&stdout).expect("Failed to parse error");
    assert_eq!(err["code"], 7);
    assert!(fixture.recorded("command").is_empty());
}

#[test]
fn test_plugin_version_command() {
    let fixture = Fixture::new("exit 0");

    let (success, stdout, stderr) = fixture.run("VERSION", "");

    assert!(success, "Plugin failed: {stderr}");
    let version_info: Value = serde_json::from_str(&stdout).expect("Failed to parse version info");
    assert_eq!(version_info["cniVersion"], "1.1.0");
    assert_eq!(
        version_info["supportedVersions"],
        json!(["0.3.0", "0.3.1", "0.4.0", "1.0.0", "1.1.0"])
    );
}

#[test]
fn test_cni_version_compatibility() {
    let fixture = Fixture::new(r#"printf '{"ips":[{"address":"fd00::5/64"}]}'"#);

    for (version, has_ip_version) in [
        ("0.3.0", true),
        ("0.3.1", true),
        ("0.4.0", true),
        ("1.0.0", false),
        ("1.1.0", false),
    ] {
        let (success, stdout, stderr) = fixture.run("ADD", &fixture.net_conf(version));

        assert!(success, "Plugin failed for version {version}: {stdout} {stderr}");
        let result: Value = serde_json::from_str(&stdout)
            .unwrap_or_else(|_| panic!("Failed to parse result for version {version}"));
        assert_eq!(result["cniVersion"], version);
        assert_eq!(result["ips"][0]["interface"], 0);
        assert_eq!(
            result["ips"][0].get("version").is_some(),
            has_ip_version,
            "version {version}"
        );
    }
}
