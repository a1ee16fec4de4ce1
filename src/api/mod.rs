pub mod handler;
pub mod middleware;
pub mod server;

#[cfg(test)]
mod tests;
