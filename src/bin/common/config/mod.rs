pub mod builder;
#[cfg(test)]
mod test;
