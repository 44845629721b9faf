#[macro_export]
macro_rules! pretty_assert_eq {
  ($left:expr, $right:expr) => {{
    pretty_assertions::assert_eq!(
      format!("{:#?}", $left).replace("\n", "\u{0085}"),
      format!("{:#?}", $right).replace("\n", "\u{0085}")
    );
  }};
}

#[macro_export]
macro_rules! pretty_assert_ulps_eq {
  ($left:expr, $right:expr $(, $opt:ident = $val:expr)* $(,)?) => {{
    approx::assert_ulps_eq!($left, $right $(, $opt = $val)*);
  }};
}
