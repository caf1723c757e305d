//! Word frequency counter pipeline
//!
//! Reads lines from stdin, splits them into words, cleans them, counts
//! frequencies, and prints the top-N words once the input ends.
//!
//! Usage: cargo run --example word_count --release
//!        (Then type lines of text and press Ctrl-D to finish)
//!
//! Set `RUST_LOG=worker_pipeline=debug` to watch stages start and stop.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, BufRead};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use worker_pipeline::{
    FilterStage, Input, Iteration, MapStage, Output, PipelineBuilder, Stage, StageDescriptor,
    StageError, INPUT, OUTPUT,
};

/// Reads one line per iteration; ends its output on EOF
struct LineReader {
    stdin: io::Stdin,
    output: Output<String>,
}

impl Stage for LineReader {
    fn iterate(&mut self) -> Iteration {
        let mut line = String::new();
        if self.stdin.lock().read_line(&mut line)? == 0 {
            return self.output.end();
        }
        self.output.push(line)
    }
}

/// Splits a line into lowercase words
struct WordSplitter {
    input: Input<String>,
    output: Output<String>,
}

impl Stage for WordSplitter {
    fn iterate(&mut self) -> Iteration {
        let line = self.input.pop()?;
        for word in line.split_whitespace() {
            self.output.push(word.to_lowercase())?;
        }
        Ok(())
    }
}

/// Tallies every word it receives
struct WordCounter {
    input: Input<String>,
    counts: Arc<Mutex<HashMap<String, usize>>>,
}

impl Stage for WordCounter {
    fn iterate(&mut self) -> Iteration {
        let word = self.input.pop()?;
        *self.counts.lock().entry(word).or_insert(0) += 1;
        Ok(())
    }
}

fn top_n(counts: &HashMap<String, usize>, n: usize) -> Vec<(&str, usize)> {
    let mut items: Vec<_> = counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    items.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    items.into_iter().take(n).collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("Word Frequency Counter Pipeline");
    println!("================================");
    println!("Enter lines of text (Ctrl-D to finish):");
    println!();

    let counts = Arc::new(Mutex::new(HashMap::new()));
    let mut builder = PipelineBuilder::new();

    let reader = builder.create_stage(StageDescriptor::new("reader"), |ports| LineReader {
        stdin: io::stdin(),
        output: ports.output(OUTPUT),
    })?;
    let splitter = builder.create_stage(StageDescriptor::new("splitter"), |ports| WordSplitter {
        input: ports.input(INPUT),
        output: ports.output(OUTPUT),
    })?;
    let cleaner = builder.create_stage(StageDescriptor::new("cleaner"), |ports| {
        MapStage::new(ports.input(INPUT), ports.output(OUTPUT), |word: String| {
            Ok::<_, StageError>(word.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        })
    })?;
    let short_words = builder.create_stage(StageDescriptor::new("length_filter"), |ports| {
        FilterStage::new(ports.input(INPUT), ports.output(OUTPUT), |word: &String| word.len() > 2)
    })?;
    let counter = builder.create_stage(StageDescriptor::new("counter").stateful(), |ports| WordCounter {
        input: ports.input(INPUT),
        counts: Arc::clone(&counts),
    })?;

    let chain = [reader, splitter, cleaner, short_words, counter];
    for pair in chain.windows(2) {
        let output = builder.output::<String>(pair[0], OUTPUT)?;
        let input = builder.input::<String>(pair[1], INPUT)?;
        builder.connect_with_capacity(&output, &input, 100)?;
    }

    let report = builder.build()?.start()?.join()?;

    let counts = counts.lock();
    println!("\n=== Top 10 Words ({} distinct) ===", counts.len());
    for (i, (word, count)) in top_n(&counts, 10).iter().enumerate() {
        println!("{:2}. {} ({})", i + 1, word, count);
    }
    println!("\n{}", report.summary());

    Ok(())
}
