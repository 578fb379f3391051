use std::collections::BTreeSet;
use std::io::{BufRead, Write};

use anyhow::{Context, bail};

use crate::models::{EpisodeRecord, EpisodeStore};

/// Every digit in the answer is one episode number, so `"1, 4, 5"` and `"145"`
/// select the same episodes. Returns `None` when the answer has no digit.
pub fn parse_selection(input: &str) -> Option<BTreeSet<usize>> {
    let numbers: BTreeSet<usize> = input
        .chars()
        .filter_map(|c| c.to_digit(10))
        .map(|d| d as usize)
        .collect();
    (!numbers.is_empty()).then_some(numbers)
}

/// Records whose episode index was selected, in scan order.
pub fn select<'a>(store: &'a EpisodeStore, indices: &BTreeSet<usize>) -> Vec<&'a EpisodeRecord> {
    store
        .iter()
        .filter(|r| indices.contains(&r.episode_index))
        .collect()
}

/// Print the listing, oldest first so the newest episode ends up next to the prompt.
pub fn print_listing<W: Write>(store: &EpisodeStore, out: &mut W) -> std::io::Result<()> {
    writeln!(out, "These are the most recent episodes:\n")?;
    for record in store.iter().rev() {
        writeln!(out, "Episode Number: {}", record.episode_index)?;
        writeln!(out, "Date: {}", record.broadcast_date)?;
        writeln!(out, "Content: {}\n", record.synopsis)?;
        writeln!(out, "Talking Points:{}\n", record.guest_text)?;
        writeln!(out, "\n------------------------------")?;
    }
    Ok(())
}

/// Ask until the answer contains at least one digit.
pub fn prompt_selection<'a, R: BufRead, W: Write>(
    store: &'a EpisodeStore,
    input: &mut R,
    out: &mut W,
) -> anyhow::Result<Vec<&'a EpisodeRecord>> {
    loop {
        write!(
            out,
            "Which of these episodes do you want to download? For example, type '1, 4, 5'.\nYour answer: "
        )?;
        out.flush()?;

        let mut line = String::new();
        let read = input.read_line(&mut line).context("read episode selection")?;
        if read == 0 {
            bail!("input closed before any episode was selected");
        }

        match parse_selection(&line) {
            Some(indices) => return Ok(select(store, &indices)),
            None => writeln!(out, "No matching episode numbers for your input. Try again.\n")?,
        }
    }
}
