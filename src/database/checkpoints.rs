use anyhow::Context;
use chrono::NaiveDateTime;
use diesel::prelude::*;

use super::MysqlTx;
use crate::models::*;

impl MysqlTx<'_> {
    pub fn get_checkpoint(&self, name: &str) -> anyhow::Result<Option<NaiveDateTime>> {
        use crate::schema::job_checkpoints::dsl::*;

        let checkpoint = job_checkpoints
            .filter(job_name.eq(name))
            .first::<JobCheckpoint>(self.conn)
            .optional()
            .context("error getting job checkpoint")?;
        Ok(checkpoint.map(|c| c.last_processed_ts))
    }

    pub fn set_checkpoint(&self, name: &str, ts: NaiveDateTime) -> anyhow::Result<()> {
        use crate::schema::job_checkpoints;

        diesel::replace_into(job_checkpoints::table)
            .values(&NewJobCheckpoint {
                job_name: name,
                last_processed_ts: ts,
            })
            .execute(self.conn)
            .context("error upserting job checkpoint")?;
        Ok(())
    }
}
