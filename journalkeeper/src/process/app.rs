use super::*;

#[derive(shrinkwraprs::Shrinkwrap, Clone)]
pub struct App(Arc<dyn StateMachine>);
impl App {
    pub fn new(x: impl StateMachine) -> Self {
        Self(Arc::new(x))
    }
}
