//! Named factories that descriptors can refer to.
use crate::data::DataFactory;
use crate::decorator::DecoratorFactory;
use std::collections::HashMap;
use std::sync::Arc;

/// Decorator and data factories addressable by name from unit descriptors.
#[derive(Clone, Default)]
pub struct Registry {
    decorators: HashMap<String, Arc<dyn DecoratorFactory>>,
    data: HashMap<String, DataFactory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_decorator(&mut self, name: &str, factory: Arc<dyn DecoratorFactory>) {
        self.decorators.insert(name.to_string(), factory);
    }

    pub fn register_data(&mut self, name: &str, factory: DataFactory) {
        self.data.insert(name.to_string(), factory);
    }

    pub fn decorator(&self, name: &str) -> Option<&Arc<dyn DecoratorFactory>> {
        self.decorators.get(name)
    }

    pub fn data_factory(&self, name: &str) -> Option<&DataFactory> {
        self.data.get(name)
    }
}
