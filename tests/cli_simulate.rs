use std::process::Command;

use serde_json::Value;

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_rhythm_cli"))
}

fn json_lines(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8(stdout.to_vec())
        .expect("stdout UTF-8")
        .lines()
        .map(|line| serde_json::from_str(line).expect("JSON line"))
        .collect()
}

#[test]
fn simulate_prints_timeline_until_finished() {
    let output = cli()
        .args([
            "simulate",
            "--mode",
            "mix-clock",
            "--length",
            "0.5",
            "--delay",
            "0.2",
        ])
        .output()
        .expect("failed to run rhythm_cli simulate");
    assert!(
        output.status.success(),
        "CLI exited with {:?}",
        output.status.code()
    );

    let lines = json_lines(&output.stdout);
    let events: Vec<&Value> = lines.iter().filter_map(|line| line.get("event")).collect();
    let kinds: Vec<&str> = events
        .iter()
        .filter_map(|event| event["type"].as_str())
        .collect();
    assert_eq!(kinds, vec!["scheduled", "finished", "stopped"]);

    let times: Vec<f64> = lines
        .iter()
        .filter_map(|line| line["current_time"].as_f64())
        .collect();
    assert!(!times.is_empty());
    assert!(times.windows(2).all(|pair| pair[1] >= pair[0]));
    assert!(times[times.len() - 1] >= 0.7);
}

#[test]
fn simulate_with_jitter_and_negative_offset_succeeds() {
    let output = cli()
        .args([
            "simulate",
            "--length",
            "0.4",
            "--delay",
            "0.5",
            "--offset",
            "-0.25",
            "--jitter-seed",
            "11",
        ])
        .output()
        .expect("failed to run rhythm_cli simulate");
    assert!(output.status.success());

    let lines = json_lines(&output.stdout);
    let scheduled = lines
        .iter()
        .filter_map(|line| line.get("event"))
        .find(|event| event["type"] == "scheduled")
        .expect("scheduled event");
    assert_eq!(scheduled["payload"]["waiting_delay"], 0.75);
    assert_eq!(scheduled["payload"]["start_secs"], 0.5);
}

#[test]
fn simulate_rejects_endless_without_duration() {
    let output = cli()
        .args(["simulate", "--endless"])
        .output()
        .expect("failed to run rhythm_cli simulate");
    assert_eq!(output.status.code(), Some(1));
}
