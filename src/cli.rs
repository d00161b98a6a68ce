//! Operator commands that work directly against the configured database.

use std::io::{self, BufRead, Write};

use anyhow::{Result, bail};

use crate::config::Command;
use crate::db::Database;
use crate::form::BookmarkForm;
use crate::model::Bookmark;
use crate::store::BookmarkStore;
use crate::sync::{DeleteOutcome, SyncView};

pub const DELETE_PROMPT: &str = "Are you sure you want to delete this bookmark?";

fn print_bookmark(out: &mut impl Write, bookmark: &Bookmark) -> io::Result<()> {
    writeln!(
        out,
        "{}  {}  {}  {}",
        bookmark.id,
        bookmark.created_at.format("%Y-%m-%d"),
        bookmark.title,
        bookmark.url
    )
}

/// Reads a yes/no answer; anything but `y`/`yes` declines.
pub fn confirm(prompt: &str, input: &mut impl BufRead, out: &mut impl Write) -> bool {
    if write!(out, "{prompt} [y/N] ").and_then(|_| out.flush()).is_err() {
        return false;
    }
    let mut answer = String::new();
    if input.read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

pub async fn run(command: Command, db: &Database) -> Result<()> {
    let mut out = io::stdout();

    match command {
        Command::Serve => bail!("serve is handled by the service entrypoint"),
        Command::List { user } => {
            for bookmark in db.list(&user).await? {
                print_bookmark(&mut out, &bookmark)?;
            }
        }
        Command::Add { user, title, url } => {
            let mut form = BookmarkForm::new(title, url);
            let record = form.submit(db, &user, |_| {}).await?;
            print_bookmark(&mut out, &record)?;
        }
        Command::Rm { user, id, yes } => {
            let mut view = SyncView::mount(db, db.feed(), &user).await;
            if !view.cache().contains(&id) {
                view.teardown();
                bail!("no bookmark {id} for user {user}");
            }

            let outcome = view
                .delete(db, &id, || {
                    yes || confirm(DELETE_PROMPT, &mut io::stdin().lock(), &mut io::stdout())
                })
                .await;
            view.teardown();

            match outcome? {
                DeleteOutcome::Deleted => writeln!(out, "deleted {id}")?,
                DeleteOutcome::Declined => writeln!(out, "kept {id}")?,
            }
        }
    }

    Ok(())
}
