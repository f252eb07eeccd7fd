#[cfg(test)]
mod pool_tests;
#[cfg(test)]
mod property_tests;
