//! Switch-gated logging through the `log` facade.
//!
//! The communicator layer only talks when its `debug` switch is on, so that
//! a verbose logger configured for the host application does not flood it
//! with allocate/free/schedule chatter.

#[macro_export]
macro_rules! cond_debug {
    ($cond_expr: expr; $($args:tt)* ) => {
        if ::log::log_enabled!(::log::Level::Debug) {
            if $cond_expr {
                ::log::debug!($($args)*)
            }
        }
    };
}

#[macro_export]
macro_rules! cond_warn {
    ($cond_expr: expr; $($args:tt)* ) => {
        if ::log::log_enabled!(::log::Level::Warn) {
            if $cond_expr {
                ::log::warn!($($args)*)
            }
        }
    };
}
