mod backfill_test;
mod failure_test;
mod resume_test;
