pub mod echo;
pub mod openai;
pub mod registry;

pub use echo::EchoExecutor;
pub use openai::OpenAiExecutor;
pub use registry::ExecutorRegistry;
