mod cli;
mod demo;
mod infra;
mod routes;
mod server;

use exit_pass::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
