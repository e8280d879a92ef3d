//! End-to-end scenarios, matching spec.md §8's table 1:1.
//!
//! Unix-only (`/bin/sh`-driven); a Windows mirror would parametrize the same
//! assertions over `cmd.exe`/`["/c", ...]`, the way
//! `turborepo_process::child::test` parametrizes its own PTY tests, but
//! there is no Windows runner in this pack to validate it against.

#![cfg(unix)]

use std::ffi::OsString;
use std::io::{Read, Write};
use std::time::Duration;

use pty_host::{spawn, Error, SpawnOptions};

fn shell_opts(args: &[&str]) -> SpawnOptions {
    let mut opts = SpawnOptions::new("/bin/sh", "/tmp");
    opts.command_line = args.iter().map(OsString::from).collect();
    opts
}

fn read_available(reader: &mut dyn Read, deadline: Duration) -> Vec<u8> {
    let mut out = Vec::new();
    let start = std::time::Instant::now();
    let mut buf = [0u8; 4096];
    while start.elapsed() < deadline {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(_) => break,
        }
        if out.windows(4).any(|w| w == b"done") {
            break;
        }
    }
    out
}

/// Scenario 1/8: `echo test` bytes arrive on the reader, and (scenario 8)
/// two sequential commands' output both arrive in order.
#[test]
fn reader_receives_child_output_in_order() {
    let conn = spawn(&shell_opts(&["-c", "echo first && echo second && echo done"]))
        .expect("spawn should succeed");
    let mut reader = conn.try_clone_reader().expect("reader should be available");

    let bytes = read_available(&mut *reader, Duration::from_secs(5));
    let text = String::from_utf8_lossy(&bytes);

    assert!(text.contains("first"), "missing first echo: {text:?}");
    assert!(text.contains("second"), "missing second echo: {text:?}");
    assert!(
        text.find("first").unwrap() < text.find("second").unwrap(),
        "output arrived out of order: {text:?}"
    );
}

/// Scenario 2: pid is positive and `exited` fires with the expected code.
#[test]
fn pid_is_positive_and_exit_code_is_reported() {
    let conn = spawn(&shell_opts(&["-c", "exit 0"])).expect("spawn should succeed");
    assert!(conn.pid() > 0);

    let exit = conn
        .wait_for_exit(Some(Duration::from_secs(5)))
        .expect("child should exit within timeout");
    assert_eq!(exit.code(), 0);
    assert!(exit.success());

    // exit_code() must now return the cached result without blocking.
    assert_eq!(conn.exit_code(), Some(exit));
}

/// Scenario 3: environment variables set in `SpawnOptions` reach the child.
#[test]
fn environment_variables_reach_the_child() {
    let mut opts = shell_opts(&["-c", "echo $MY_TEST_VAR; echo done"]);
    opts.environment
        .insert("MY_TEST_VAR".to_string(), "custom_value_12345".to_string());

    let conn = spawn(&opts).expect("spawn should succeed");
    let mut reader = conn.try_clone_reader().expect("reader should be available");
    let bytes = read_available(&mut *reader, Duration::from_secs(5));
    let text = String::from_utf8_lossy(&bytes);

    assert!(
        text.contains("custom_value_12345"),
        "env var not visible to child: {text:?}"
    );
}

/// Scenario 4: resize succeeds (twice) against a live interactive shell.
#[test]
fn resize_succeeds_against_a_live_shell() {
    let conn = spawn(&shell_opts(&[])).expect("spawn should succeed");

    assert!(conn.resize(120, 40).is_ok());
    assert!(conn.resize(40, 10).is_ok());

    conn.kill().expect("cleanup kill should succeed");
}

/// Scenario 5: kill() on a live interactive shell is observable via
/// wait_for_exit within the 5s timeout spec.md names.
#[test]
fn kill_on_interactive_shell_is_observed_by_wait_for_exit() {
    let conn = spawn(&shell_opts(&[])).expect("spawn should succeed");
    std::thread::sleep(Duration::from_millis(500));

    conn.kill().expect("kill should succeed");

    let exited = conn.wait_for_exit(Some(Duration::from_secs(5)));
    assert!(exited.is_some(), "child should have been reaped after kill");
}

/// Scenario 6: wait_for_exit on a still-running shell times out (false).
#[test]
fn wait_for_exit_times_out_on_a_running_shell() {
    let conn = spawn(&shell_opts(&["-c", "sleep 5"])).expect("spawn should succeed");

    let result = conn.wait_for_exit(Some(Duration::from_millis(100)));
    assert!(result.is_none(), "expected timeout, got {result:?}");

    conn.kill().expect("cleanup kill should succeed");
}

/// Scenario 7: an empty `app` is rejected synchronously as InvalidArguments,
/// before any OS resource is touched.
#[test]
fn empty_app_is_rejected_synchronously() {
    let opts = SpawnOptions::new("", "/tmp");
    let err = spawn(&opts).expect_err("empty app must fail validation");
    assert!(matches!(err, Error::InvalidArguments(_)));
}

/// kill() followed by a write to the writer does not panic or deadlock;
/// the writer simply observes a broken pipe once the child is gone.
#[test]
fn writer_survives_child_death() {
    let conn = spawn(&shell_opts(&["-c", "cat"])).expect("spawn should succeed");
    let mut writer = conn.take_writer().expect("writer should be available");

    writer.write_all(b"hello\n").expect("initial write should succeed");
    conn.kill().expect("kill should succeed");
    conn.wait_for_exit(Some(Duration::from_secs(5)));

    // A further write may fail (broken pipe) but must not panic.
    let _ = writer.write_all(b"after death\n");
}
