pub mod alignment;
pub mod ancestral;
pub mod config;
pub mod constants;
pub mod likelihood;
pub mod matrix;
pub mod model;
pub mod scalar;
pub mod tree;
pub mod utils;

#[cfg(test)]
mod tests {
  use crate::utils::global_init::global_init;
  use ctor::ctor;

  #[ctor]
  fn init() {
    global_init();
  }
}
