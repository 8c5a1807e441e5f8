#[macro_export]
#[doc(hidden)]
macro_rules! error {
  ($kind:ident, $fmt:literal $(,$($arg:tt)*)?) => {
    $crate::error::Error::new(
      $crate::error::ErrorKind::$kind,
      format!($fmt $(, $($arg)*)?),
    )
  };
  ($kind:ident, $msg:expr) => {
    $crate::error::Error::new($crate::error::ErrorKind::$kind, $msg)
  };
}

#[macro_export]
#[doc(hidden)]
macro_rules! fail {
  ($kind:ident, $fmt:literal $(,$($arg:tt)*)?) => {
    return Err($crate::error!($kind, $fmt $(, $($arg)*)?))
  };
  ($kind:ident, $msg:expr) => {
    return Err($crate::error!($kind, $msg))
  };
}
