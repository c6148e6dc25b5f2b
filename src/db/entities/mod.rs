pub mod autorole_configs;
