//! Console walk-through of one interview against the deterministic mock
//! evaluator. Answers are read line by line from stdin.
//!
//! ```text
//! printf 'no\nno\nno\nno\nno\n' | cargo run --bin interview_demo
//! ```

use std::sync::Arc;

use isolation_interview::config::InterviewSettings;
use isolation_interview::evaluator::MockEvaluator;
use isolation_interview::questions::QuestionBank;
use isolation_interview::storage::MemorySink;
use isolation_interview::{FlowController, FlowOutput, InterviewDeps};
use tokio::io::{AsyncBufReadExt, BufReader};

fn show(out: &FlowOutput) {
    match out {
        FlowOutput::Question {
            prompt, message, ..
        } => {
            if let Some(m) = message {
                println!("{m}\n");
            }
            println!("> {prompt}");
        }
        FlowOutput::Clarification {
            prompt, attempt, ..
        } => println!("> ({attempt}) {prompt}"),
        FlowOutput::Finished {
            diagnosis, message, ..
        } => println!("\n{message}\n[diagnosis: {diagnosis}]"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let deps = InterviewDeps::new(
        Arc::new(QuestionBank::builtin()),
        Arc::new(MockEvaluator),
        Arc::new(MemorySink::new()),
        &InterviewSettings::default(),
    );
    let mut flow = FlowController::new("demo", deps);

    let mut out = flow.start().await?;
    show(&out);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while !out.is_finished() {
        let Some(line) = lines.next_line().await? else {
            println!("(input ended before the interview finished)");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        out = flow.submit_answer(&line).await?;
        show(&out);
    }
    Ok(())
}
