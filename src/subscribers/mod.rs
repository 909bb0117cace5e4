//! Subscriber API: the [`Subscribe`] trait and the fan-out [`SubscriberSet`].

mod set;
mod subscribe;

#[cfg(feature = "logging")]
mod log;

pub use set::SubscriberSet;
pub use subscribe::Subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
