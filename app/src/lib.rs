pub mod app;
pub mod session;
pub mod ui;
pub mod view;

pub use app::{render_ui, SignetEguiApp};
pub use session::{OidcSessionFactory, SessionFactory};
pub use view::ViewModel;
