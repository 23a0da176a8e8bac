//! `widmate status` – show jobs recorded in the job database.

use anyhow::Result;
use widmate_core::job_db::JobDb;

pub async fn run_status() -> Result<()> {
    let db = JobDb::open_default().await?;
    let jobs = db.load_jobs().await?;
    if jobs.is_empty() {
        println!("No jobs in database.");
    } else {
        println!("{:<36} {:<10} {:>6} {}", "ID", "STATE", "PCT", "URL");
        for j in jobs {
            println!(
                "{:<36} {:<10} {:>5.1}% {}",
                j.id, j.status, j.progress, j.source_url
            );
            if let Some(err) = &j.error {
                println!("{:<36} error: {}", "", err);
            }
        }
    }
    Ok(())
}
