//! Interactive operator prompts

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use colored::Colorize;
use retrain_lib::config::PolicyConfig;
use retrain_lib::{Confirmation, DatasetSource, RetrainDecision};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

use crate::output::{color_metric, color_recommendation, print_warning};

/// Line-oriented prompts over stdin
pub struct Prompter {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl Prompter {
    pub fn stdin() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }

    /// Print `question` and read one trimmed line
    pub async fn ask(&self, question: &str) -> Result<String> {
        print!("{} ", question);
        std::io::stdout().flush().context("Failed to flush stdout")?;

        let line = self
            .lines
            .lock()
            .await
            .next_line()
            .await
            .context("Failed to read from stdin")?;
        match line {
            Some(line) => Ok(line.trim().to_string()),
            None => bail!("stdin closed while waiting for an answer"),
        }
    }

    /// Ask until the answer names an existing directory
    async fn ask_dir(&self, question: &str) -> Result<PathBuf> {
        loop {
            let answer = self.ask(question).await?;
            let path = PathBuf::from(&answer);
            if !answer.is_empty() && path.is_dir() {
                return Ok(path);
            }
            print_warning(&format!("Not a directory: '{}', try again", answer));
        }
    }

    /// Dataset source selection (auto export or existing folder)
    pub async fn choose_dataset(&self) -> Result<DatasetSource> {
        println!("{}", "Select the evaluation dataset".bold());
        println!("  1) Export from the annotation tool and align with original images");
        println!("  2) Use an existing dataset folder (images/ + labels/)");

        loop {
            match self.ask("Choice [1/2]:").await?.as_str() {
                "1" => {
                    let originals_dir = self.ask_dir("Folder with the original images:").await?;
                    return Ok(DatasetSource::Auto { originals_dir });
                }
                "2" => {
                    let root = self.ask_dir("Dataset folder:").await?;
                    return Ok(DatasetSource::Manual { root });
                }
                other => print_warning(&format!("Invalid choice '{}', enter 1 or 2", other)),
            }
        }
    }
}

/// Shows the recommendation and asks whether to fine-tune
pub struct InteractiveConfirmation {
    prompter: Arc<Prompter>,
    policy: PolicyConfig,
}

impl InteractiveConfirmation {
    pub fn new(prompter: Arc<Prompter>, policy: PolicyConfig) -> Self {
        Self { prompter, policy }
    }
}

#[async_trait]
impl Confirmation for InteractiveConfirmation {
    async fn confirm(&self, metric: f64, decision: &RetrainDecision) -> bool {
        println!();
        println!("mAP50:          {}", color_metric(metric, self.policy.abs_threshold));
        println!("Recommendation: {}", color_recommendation(decision.recommended));
        println!("Reason:         {}", decision.reason);

        let question = if decision.recommended {
            "Launch fine-tuning? [Y/n]:"
        } else {
            "Launch fine-tuning anyway? [y/N]:"
        };

        match self.prompter.ask(question).await {
            Ok(answer) => parse_yes_no(&answer, decision.recommended),
            Err(e) => {
                print_warning(&format!("{e:#}; not fine-tuning"));
                false
            }
        }
    }
}

/// `y`/`yes` and `n`/`no` in any case; empty takes the default
fn parse_yes_no(answer: &str, default: bool) -> bool {
    match answer.to_lowercase().as_str() {
        "" => default,
        "y" | "yes" => true,
        _ => false,
    }
}
