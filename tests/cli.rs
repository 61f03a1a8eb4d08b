use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use httpmock::prelude::*;
use serde_json::json;
use tempfile::NamedTempFile;

fn socialname() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_socialname"));
    command.env_remove("SOCIALNAME_SITES").env_remove("RUST_LOG");
    command
}

/// A mock server where `blue` exists on Taken and nowhere else, plus a site
/// file pointing at it. Unmatched requests get httpmock's default 404.
fn fixture() -> (MockServer, NamedTempFile) {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/taken/blue");
        then.status(200).body("profile");
    });
    server.mock(|when, then| {
        when.method(GET).path_contains("/vacant/");
        then.status(404);
    });

    let site = |prefix: &str| {
        json!({
            "logic": "status_code",
            "urlMain": server.url("/"),
            "urlUser": server.url(format!("/{prefix}/{{}}")),
            "usernameClaimed": "blue",
            "usernameUnclaimed": "ghost"
        })
    };
    let sites = site_file(&json!({
        "Taken": site("taken"),
        "Vacant": site("vacant"),
    }));
    (server, sites)
}

fn site_file(sites: &serde_json::Value) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    file.write_all(sites.to_string().as_bytes()).unwrap();
    file
}

#[test]
fn no_args_exits_with_code_2() {
    let output = socialname().output().expect("failed to execute");
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no usernames provided"), "stderr: {stderr}");
}

#[test]
fn invalid_username_exits_with_code_2() {
    let output = socialname()
        .arg("a/b")
        .output()
        .expect("failed to execute");
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid character"), "stderr: {stderr}");
    assert!(output.stdout.is_empty());
}

#[test]
fn zero_timeout_is_rejected() {
    let output = socialname()
        .args(["--timeout", "0", "blue"])
        .output()
        .expect("failed to execute");
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("must be greater than 0"), "stderr: {stderr}");
}

#[test]
fn list_sites_prints_markdown() {
    let output = socialname()
        .arg("--list-sites")
        .output()
        .expect("failed to execute");
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("## List Of Supported Sites ("), "stdout: {stdout}");
    assert!(stdout.contains("[GitHub](https://github.com/)"), "stdout: {stdout}");
}

#[test]
fn missing_site_file_exits_with_code_1() {
    let output = socialname()
        .args(["--json", "/definitely/not/here.json", "blue"])
        .output()
        .expect("failed to execute");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("reading site data"), "stderr: {stderr}");
}

#[test]
fn non_json_site_file_exits_with_code_1() {
    let output = socialname()
        .args(["--json", "sites.txt", "blue"])
        .output()
        .expect("failed to execute");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("JSON file extension"), "stderr: {stderr}");
}

#[test]
fn malformed_site_file_exits_with_code_1() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    file.write_all(
        br#"{"Broken": {"logic": "status_code", "urlMain": "https://x.example/",
            "urlUser": "https://x.example/user", "usernameClaimed": "a", "usernameUnclaimed": "b"}}"#,
    )
    .unwrap();

    let output = socialname()
        .arg("--json")
        .arg(file.path())
        .arg("blue")
        .output()
        .expect("failed to execute");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Broken"), "stderr: {stderr}");
    assert!(stderr.contains("placeholder"), "stderr: {stderr}");
}

#[test]
fn unknown_site_filter_exits_with_code_1() {
    let output = socialname()
        .args(["--site", "NoSuchSite", "blue"])
        .output()
        .expect("failed to execute");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no sites to check"), "stderr: {stderr}");
}

#[test]
fn text_output_lists_taken_sites() {
    let (server, sites) = fixture();
    let output = socialname()
        .arg("--json")
        .arg(sites.path())
        .arg("blue")
        .output()
        .expect("failed to execute");
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[*] Checking username blue on:"), "stdout: {stdout}");
    assert!(
        stdout.contains(&format!("[+] Taken: {}", server.url("/taken/blue"))),
        "stdout: {stdout}"
    );
    assert!(!stdout.contains("Vacant"), "stdout: {stdout}");
    assert!(stdout.contains("Search completed with 1 results"), "stdout: {stdout}");
}

#[test]
fn print_all_shows_available_sites() {
    let (_server, sites) = fixture();
    let output = socialname()
        .arg("--json")
        .arg(sites.path())
        .args(["--print-all", "blue"])
        .output()
        .expect("failed to execute");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[-] Vacant: Not Found!"), "stdout: {stdout}");
}

#[test]
fn tab_separated_output_format() {
    let (_server, sites) = fixture();
    let output = socialname()
        .arg("--json")
        .arg(sites.path())
        .args(["--format", "tsv", "--sort", "registry", "--print-all", "blue"])
        .output()
        .expect("failed to execute");
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2, "stdout: {stdout}");
    assert!(lines[0].starts_with("Taken\ttaken\t"), "stdout: {stdout}");
    assert!(lines[1].starts_with("Vacant\tavailable\t"), "stdout: {stdout}");
}

#[test]
fn json_output_has_one_report_per_username() {
    let (_server, sites) = fixture();
    let output = socialname()
        .arg("--json")
        .arg(sites.path())
        .args(["--format", "json", "blue", "ghost", "blue"])
        .output()
        .expect("failed to execute");
    assert_eq!(output.status.code(), Some(0));
    let reports: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let reports = reports.as_array().unwrap();
    assert_eq!(reports.len(), 2, "duplicates should be dropped");
    assert_eq!(reports[0]["username"], "blue");
    assert_eq!(reports[0]["results"][0]["classification"], "taken");
    assert_eq!(reports[1]["username"], "ghost");
    assert_eq!(reports[1]["results"][0]["classification"], "available");
}

#[test]
fn csv_output_written_to_file() {
    let (_server, sites) = fixture();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blue.csv");
    let output = socialname()
        .arg("--json")
        .arg(sites.path())
        .args(["--format", "csv", "--output"])
        .arg(&path)
        .arg("blue")
        .output()
        .expect("failed to execute");
    assert_eq!(output.status.code(), Some(0));
    assert!(output.stdout.is_empty());

    let csv = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(
        lines[0],
        "username,name,url_main,url_user,exists,http_status,response_time_s"
    );
    assert_eq!(lines.len(), 3, "csv: {csv}");
    assert!(lines[1].starts_with("blue,Taken,"), "csv: {csv}");
    assert!(lines[1].contains(",Claimed,200,"), "csv: {csv}");
}

#[test]
fn site_filter_limits_the_check() {
    let (_server, sites) = fixture();
    let output = socialname()
        .arg("--json")
        .arg(sites.path())
        .args(["--site", "vacant", "--format", "tsv", "--print-all", "blue"])
        .output()
        .expect("failed to execute");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().count(), 1, "stdout: {stdout}");
    assert!(stdout.starts_with("Vacant\t"), "stdout: {stdout}");
}

#[test]
fn stdin_piping() {
    let (_server, sites) = fixture();
    let output = socialname()
        .arg("--json")
        .arg(sites.path())
        .args(["--format", "tsv", "--print-all"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .and_then(|mut child| {
            if let Some(ref mut stdin) = child.stdin {
                stdin.write_all(b"blue\nghost\n\n").ok();
            }
            drop(child.stdin.take());
            child.wait_with_output()
        })
        .expect("failed to execute");
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().count(), 4, "stdout: {stdout}");
    assert_eq!(
        stdout.lines().filter(|l| l.contains("\ttaken\t")).count(),
        1,
        "stdout: {stdout}"
    );
}

#[test]
fn usernames_are_validated_before_site_data_is_fetched() {
    let server = MockServer::start();
    let sites = server.mock(|when, then| {
        when.method(GET).path("/sites.json");
        then.status(200).body("{}");
    });
    let output = socialname()
        .arg("--json")
        .arg(server.url("/sites.json"))
        .output()
        .expect("failed to execute");
    assert_eq!(output.status.code(), Some(2));
    sites.assert_hits(0);
}

#[test]
fn text_lines_are_printed_as_sites_answer() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/slow/blue");
        then.status(200).delay(Duration::from_secs(4));
    });
    server.mock(|when, then| {
        when.method(GET).path("/fast/blue");
        then.status(200);
    });
    let site = |prefix: &str| {
        json!({
            "logic": "status_code",
            "urlMain": server.url("/"),
            "urlUser": server.url(format!("/{prefix}/{{}}")),
            "usernameClaimed": "blue",
            "usernameUnclaimed": "ghost"
        })
    };
    let sites = site_file(&json!({"Slow": site("slow"), "Fast": site("fast")}));

    let started = Instant::now();
    let mut child = socialname()
        .arg("--json")
        .arg(sites.path())
        .arg("blue")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to execute");
    let mut lines = BufReader::new(child.stdout.take().unwrap()).lines();

    assert_eq!(lines.next().unwrap().unwrap(), "[*] Checking username blue on:");
    let first = lines.next().unwrap().unwrap();
    let waited = started.elapsed();
    assert!(first.starts_with("[+] Fast: "), "first line: {first}");
    assert!(waited < Duration::from_secs(3), "fast site waited {waited:?}");

    let rest: Vec<String> = lines.map(Result::unwrap).collect();
    assert!(rest[0].starts_with("[+] Slow: "), "rest: {rest:?}");
    assert_eq!(rest[1], "[*] Search completed with 2 results");
    assert!(child.wait().unwrap().success());
}

#[test]
fn folder_output_writes_a_file_per_username_and_master_csv() {
    let (server, sites) = fixture();
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("results");
    let output = socialname()
        .arg("--json")
        .arg(sites.path())
        .arg("--folderoutput")
        .arg(&folder)
        .args(["--singleoutput", "blue", "ghost"])
        .output()
        .expect("failed to execute");
    assert_eq!(output.status.code(), Some(0));

    let taken = server.url("/taken/blue");
    assert_eq!(
        std::fs::read_to_string(folder.join("blue.txt")).unwrap(),
        format!("{taken}\nTotal Websites Username Detected On : 1\n")
    );
    assert_eq!(
        std::fs::read_to_string(folder.join("ghost.txt")).unwrap(),
        "Total Websites Username Detected On : 0\n"
    );
    let master = std::fs::read_to_string(folder.join("master.csv")).unwrap();
    let lines: Vec<&str> = master.lines().collect();
    assert_eq!(
        lines,
        [
            "username,name,url_user,account_count".to_string(),
            format!("blue,Taken,{taken},1"),
        ]
    );
}

#[test]
fn folder_output_uses_the_chosen_format() {
    let (_server, sites) = fixture();
    let dir = tempfile::tempdir().unwrap();
    let output = socialname()
        .arg("--json")
        .arg(sites.path())
        .args(["--format", "csv", "--folderoutput"])
        .arg(dir.path())
        .arg("blue")
        .output()
        .expect("failed to execute");
    assert_eq!(output.status.code(), Some(0));
    let csv = std::fs::read_to_string(dir.path().join("blue.csv")).unwrap();
    assert_eq!(csv.lines().count(), 3, "csv: {csv}");
    assert!(csv.contains("blue,Vacant,"), "csv: {csv}");
}

#[test]
fn single_output_defaults_to_the_current_directory() {
    let (_server, sites) = fixture();
    let dir = tempfile::tempdir().unwrap();
    let output = socialname()
        .current_dir(dir.path())
        .arg("--json")
        .arg(sites.path())
        .args(["-s", "blue"])
        .output()
        .expect("failed to execute");
    assert_eq!(output.status.code(), Some(0));
    let master = std::fs::read_to_string(dir.path().join("master.csv")).unwrap();
    assert!(master.starts_with("username,name,url_user,account_count\n"), "{master}");
    assert!(master.contains("blue,Taken,"), "{master}");
}

#[test]
fn output_and_folder_output_conflict() {
    let output = socialname()
        .args(["--output", "a.txt", "--folderoutput", "dir", "blue"])
        .output()
        .expect("failed to execute");
    assert_eq!(output.status.code(), Some(2));
}
