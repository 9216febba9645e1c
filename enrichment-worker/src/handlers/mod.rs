mod app;
mod event;

pub use app::add_routes;
pub use event::EventsResponse;
