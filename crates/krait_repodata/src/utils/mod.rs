pub(crate) mod simple_channel_server;
