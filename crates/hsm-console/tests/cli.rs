#[cfg(test)]
mod tests {
    use assert_cmd::assert::OutputAssertExt;
    use escargot::CargoBuild;
    use predicates::prelude::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn console(config_dir: &TempDir) -> Command {
        let mut cmd = CargoBuild::new()
            .bin("hsm-console")
            .run()
            .unwrap()
            .command();
        cmd.arg("--config")
            .arg(config_dir.path().join("config.toml"))
            .env_remove("HSM_CONSOLE_ENDPOINT")
            .env_remove("HSM_CONSOLE_PASSWORD")
            .env_remove("HSM_CONSOLE_KEY_STORE_PASSWORD")
            .env_remove("HSM_CONSOLE_TRUST_STORE_PASSWORD");
        cmd
    }

    #[test]
    fn test_help_output() {
        let dir = TempDir::new().unwrap();
        let mut cmd = console(&dir);
        cmd.arg("--help");
        cmd.assert()
            .success()
            .stdout(predicate::str::contains("operator console for a remote HSM service"))
            .stdout(predicate::str::contains("slots"))
            .stdout(predicate::str::contains("verify"));
    }

    #[test]
    fn test_version_output() {
        let dir = TempDir::new().unwrap();
        let mut cmd = console(&dir);
        cmd.arg("--version");
        cmd.assert()
            .success()
            .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_unknown_algorithm_rejected_by_parser() {
        let dir = TempDir::new().unwrap();
        let mut cmd = console(&dir);
        cmd.args([
            "sign",
            "--slot",
            "1",
            "--key",
            "ops",
            "--algorithm",
            "SHA1withRSA",
            "hello",
        ]);
        cmd.assert()
            .failure()
            .stderr(predicate::str::contains("SHA256withECDSA"));
    }

    #[test]
    fn test_login_validation_happens_before_network() {
        let dir = TempDir::new().unwrap();
        let key_store = dir.path().join("client.p12");
        let trust_store = dir.path().join("trust.jks");
        std::fs::write(&key_store, [0x30, 0x82]).unwrap();
        std::fs::write(&trust_store, [0xfe, 0xed]).unwrap();

        let mut cmd = console(&dir);
        cmd.args(["--endpoint", "http://127.0.0.1:9/api/v1", "login"])
            .args(["--username", "operator", "--password", "secret", "--mtls"])
            .arg("--key-store")
            .arg(&key_store)
            .args(["--key-store-password", "ks-pass"])
            .arg("--trust-store")
            .arg(&trust_store);
        cmd.assert()
            .failure()
            .stderr(predicate::str::contains("TrustStore password is required."));
    }

    #[test]
    fn test_first_run_writes_config() {
        let dir = TempDir::new().unwrap();
        let mut cmd = console(&dir);
        cmd.args(["login", "--username", " "]);
        cmd.assert()
            .failure()
            .stderr(predicate::str::contains("Username is required."));

        let written = std::fs::read_to_string(dir.path().join("config.toml")).unwrap();
        assert!(written.contains("endpoint"));
        assert!(written.contains("SHA256withECDSA"));
    }

    #[test]
    fn test_unreachable_endpoint_reports_slot_failure() {
        let dir = TempDir::new().unwrap();
        let mut cmd = console(&dir);
        cmd.args([
            "--endpoint",
            "http://127.0.0.1:9/api/v1",
            "--timeout",
            "5",
            "keys",
        ]);
        cmd.assert()
            .failure()
            .stderr(predicate::str::contains("listing slots"))
            .stderr(predicate::str::contains("transport error"));
    }
}
