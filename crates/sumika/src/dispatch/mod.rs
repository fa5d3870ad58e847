//! Action dispatch and the zone and scene collaborators it resolves against.

mod dispatcher;
mod scenes;
mod zones;

pub use dispatcher::CommandSink;
pub use dispatcher::Directory;
pub use dispatcher::DispatchError;
pub use dispatcher::Dispatcher;
pub use dispatcher::SceneCatalog;
pub use dispatcher::ZoneDirectory;
pub use scenes::Scene;
pub use scenes::SceneLibrary;
pub use scenes::SceneLight;
pub use zones::ZoneError;
pub use zones::ZoneRegistry;
