pub mod channel;
pub mod supabase;

pub use channel::*;
pub use supabase::SupabaseRealtimeSource;
