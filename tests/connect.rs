mod common;

use common::*;

#[test]
fn basic_packet() {
    let packet_data = vec![
        0b00010000u8, // Packet Type and Flags
        0x10, // Remaining Length
        0, 4, 0x4d, 0x51, 0x54, 0x54, // Protocol Name
        4, // Protocol Level
        0b00000000, // Connect Flags
        0, 0, // Keep Alive
        0, 4, 0x4d, 0x51, 0x54, 0x54, // Client ID
    ];

    let packet = MqttPacket::Connect {
        protocol_level: ProtoLvl::V3_1_1,
        clean_session: false,
        keep_alive: 0,
        client_id: "MQTT".to_string(),
        will: None,
        username: None,
        password: None,
    };

    check_encode(packet, &packet_data);
}

#[test]
fn version_3_1() {
    let packet_data = vec![
        0b00010000u8, // Packet Type and Flags
        0x11, // Remaining Length
        0, 6, 0x4d, 0x51, 0x49, 0x73, 0x64, 0x70, // Protocol Name
        3, // Protocol Level
        0b00000010, // Connect Flags
        0, 60, // Keep Alive
        0, 3, 0x61, 0x62, 0x63, // Client ID
    ];

    let packet = MqttPacket::Connect {
        protocol_level: ProtoLvl::V3_1,
        clean_session: true,
        keep_alive: 60,
        client_id: "abc".to_string(),
        will: None,
        username: None,
        password: None,
    };

    check_encode(packet, &packet_data);
}

#[test]
fn will_and_credentials() {
    let packet_data = vec![
        0b00010000u8, // Packet Type and Flags
        0x20, // Remaining Length
        0, 4, 0x4d, 0x51, 0x54, 0x54, // Protocol Name
        4, // Protocol Level
        0b11101110, // Connect Flags
        0, 10, // Keep Alive
        0, 4, 0x4d, 0x51, 0x54, 0x54, // Client ID
        0, 3, 0x61, 0x2F, 0x62, // Will Topic
        0, 3, 0x62, 0x79, 0x65, // Will Message
        0, 1, 0x75, // Username
        0, 1, 0x70, // Password
    ];

    let packet = MqttPacket::Connect {
        protocol_level: ProtoLvl::V3_1_1,
        clean_session: true,
        keep_alive: 10,
        client_id: "MQTT".to_string(),
        will: Some(Message::new("a/b", "bye", QualityOfService::QoS1).retained(true)),
        username: Some("u".to_string()),
        password: Some("p".to_string()),
    };

    check_encode(packet, &packet_data);
}

#[test]
fn built_from_settings() {
    let settings = settings()
        .client_id("MQTT")
        .keep_alive(10u16)
        .clean_session(true)
        .username("u")
        .password("p")
        .will(Message::new("a/b", "bye", QualityOfService::QoS1).retained(true))
        .build()
        .unwrap();

    let mut buf: Vec<u8> = Vec::new();
    settings.connect_packet().encode(&mut buf).unwrap();
    assert_eq!(buf[9], 0b11101110);
    assert_eq!(buf.len(), 34);
}

#[test]
fn client_never_decodes_connect() {
    let packet_data = vec![
        0b00010000u8,
        0x10,
        0, 4, 0x4d, 0x51, 0x54, 0x54,
        4,
        0b00000000,
        0, 0,
        0, 4, 0x4d, 0x51, 0x54, 0x54,
    ];

    assert_eq!(
        MqttPacket::from_buf(&packet_data),
        Err(tokio_mqtt3::proto::Error::UnsupportedDecode {
            packet_type: PacketType::Connect
        })
    );
}

#[test]
fn bad_packet_flags() {
    let packet_data = vec![0b00010101u8, 0];
    assert_eq!(
        MqttPacket::from_buf(&packet_data),
        Err(tokio_mqtt3::proto::Error::InvalidPacketFlags {
            packet_type: PacketType::Connect,
            flags: 0b0101
        })
    );
}
